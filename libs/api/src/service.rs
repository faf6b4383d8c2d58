use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::RelayError;
use crate::types::{Acknowledgement, Record};

/// Контракт RPC `PostData(Record) -> Acknowledgement`.
///
/// Реализуют sink-роутер (server side) и RPC-клиент (subscriber side),
/// поэтому subscriber не знает, в том же процессе sink или нет.
pub trait RecordService: Send + Sync {
    fn post_data(&self, record: Record)
        -> Pin<Box<dyn Future<Output = Result<Acknowledgement, RelayError>> + Send + '_>>;
}

/// Диалект параметризованного SQL: стиль плейсхолдеров.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    /// `$1, $2, ...`
    Postgres,
    /// `?, ?, ...`
    MySql,
}

impl SqlDialect {
    /// Плейсхолдер для параметра с 1-based номером `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${n}"),
            SqlDialect::MySql => "?".to_string(),
        }
    }
}

/// Форма нативной записи. Writer объявляет, какие формы он принимает,
/// и несовпадение ловится при сборке роутера, а не на первой записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteShape {
    Sql(SqlDialect),
    Document,
}

impl WriteShape {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteShape::Sql(SqlDialect::Postgres) => "postgres sql",
            WriteShape::Sql(SqlDialect::MySql) => "mysql sql",
            WriteShape::Document => "document",
        }
    }
}

impl std::fmt::Display for WriteShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Нативное представление записи для конкретного backend'а.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeWrite {
    /// Параметризованный INSERT и позиционные параметры.
    Relational { dialect: SqlDialect, statement: String, params: Vec<String> },
    /// Документ по ключу; `ttl` для эфемерных backend'ов.
    Document { key: String, body: serde_json::Value, ttl: Option<Duration> },
}

impl NativeWrite {
    pub fn shape(&self) -> WriteShape {
        match self {
            NativeWrite::Relational { dialect, .. } => WriteShape::Sql(*dialect),
            NativeWrite::Document { .. } => WriteShape::Document,
        }
    }
}

/// Backend Writer: одна операция записи.
///
/// Хэндлы используются конкурентно из нескольких RPC-вызовов,
/// реализации держат пул соединений или внутренний lock.
pub trait BackendWriter: Send + Sync {
    fn name(&self) -> &str;

    /// Умеет ли writer хранить записи формы `shape`.
    fn accepts(&self, shape: WriteShape) -> bool;

    fn write<'a>(&'a self, write: &'a NativeWrite)
        -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>>;
}
