use std::fmt;

/// Что сломалось — от этого зависит реакция стадии.
///
/// | kind       | publisher          | subscriber         | sink (RPC)    |
/// |------------|--------------------|--------------------|---------------|
/// | `Config`   | не стартует        | не стартует        | не стартует   |
/// | `Io`       | счётчик / abort    | стоп цикла         | 500           |
/// | `Format`   | строка пропущена   | сообщение пропущено| 422           |
/// | `Closed`   | конец публикации   | стоп цикла         | 500           |
/// | `Rejected` | —                  | —                  | лог + ack     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    /// Обрыв брокера, RPC или соединения с backend'ом.
    Io,
    /// Битая строка источника, payload или тело ответа.
    Format,
    /// Handle уже остановлен: producer после `close`, повторный
    /// `deliveries`.
    Closed,
    /// Backend не принимает запись такой формы.
    Rejected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Format => "format",
            ErrorKind::Closed => "closed",
            ErrorKind::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ошибка на границе трейтов: queue client, RPC, backend writer, codec.
///
/// Собственные enum'ы крейтов (`QueueError`, `RpcError`, ...) сводятся
/// к ней через `into_relay_error`, чтобы стадия видела только `kind`.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayError {
    kind: ErrorKind,
    message: String,
}

impl RelayError {
    fn with(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::with(ErrorKind::Config, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::with(ErrorKind::Io, msg)
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self::with(ErrorKind::Format, msg)
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::with(ErrorKind::Closed, msg)
    }

    /// `backend` получил запись формы `shape`, которую не умеет писать.
    pub fn rejected(backend: &str, shape: &str) -> Self {
        Self::with(ErrorKind::Rejected, format!("{backend}: {shape} writes are not supported"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_config(&self) -> bool {
        self.kind == ErrorKind::Config
    }
}

impl fmt::Debug for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RelayError {}
