use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use relay_api::{
    Acknowledgement, BackendWriter, Destination, NativeWrite, Record, RecordService, RelayError,
    SqlDialect,
};

use crate::config::{SinkConfig, UnknownDestinationPolicy};
use crate::diagnostics::Diagnostics;
use crate::PipelineError;

/// Проверка SQL-идентификатора: `[A-Za-z_][A-Za-z0-9_]*`, допускается
/// квалификация схемой через точку.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn check_identifier(name: &str) -> Result<(), PipelineError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(PipelineError::InvalidColumn(name.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════
//  SinkRouter
// ═══════════════════════════════════════════════════════════════

/// Финальная стадия: provenance hop → выбор backend'а по `destination`
/// → нативная запись → acknowledgement.
///
/// Ошибка backend writer'а логируется и не мешает подтверждению:
/// отказ одного backend'а не блокирует записи для других.
pub struct SinkRouter {
    writers: HashMap<Destination, Arc<dyn BackendWriter>>,
    config: SinkConfig,
    host: String,
    diag: Diagnostics,
}

impl SinkRouter {
    pub fn new(config: SinkConfig, host: String, diag: Diagnostics) -> Result<Self, PipelineError> {
        for table in [&config.postgres_table, &config.mariadb_table] {
            if !is_identifier(table) {
                return Err(PipelineError::Config(format!("invalid table name '{table}'")));
            }
        }
        Ok(Self { writers: HashMap::new(), config, host, diag })
    }

    /// Зарегистрировать writer для destination. Повторная регистрация
    /// заменяет прежний writer.
    ///
    /// Writer должен принимать форму записи destination'а: mongodb не
    /// пишется в SQL-backend, `?`-плейсхолдеры mariadb не уходят в postgres.
    pub fn register(&mut self, destination: Destination, writer: Arc<dyn BackendWriter>) -> Result<(), PipelineError> {
        let Some(shape) = destination.shape() else {
            return Err(PipelineError::Config(format!("cannot register writer for '{destination}'")));
        };
        if !writer.accepts(shape) {
            return Err(PipelineError::Config(format!(
                "writer '{}' cannot store {destination} records ({shape} writes)",
                writer.name()
            )));
        }
        tracing::info!(parent: self.diag.span(), destination = %destination, writer = writer.name(), "writer registered");
        self.writers.insert(destination, writer);
        Ok(())
    }

    pub fn with_writer(mut self, destination: Destination, writer: Arc<dyn BackendWriter>) -> Result<Self, PipelineError> {
        self.register(destination, writer)?;
        Ok(self)
    }

    /// Нативное представление записи для backend'а.
    pub fn native_write(&self, destination: &Destination, record: &Record) -> Result<NativeWrite, PipelineError> {
        match destination {
            Destination::Postgres => {
                let (columns, params) = relational_row(record)?;
                Ok(insert(SqlDialect::Postgres, &self.config.postgres_table, &columns, params))
            }
            Destination::MariaDb => {
                let (mut columns, mut params) = relational_row(record)?;
                columns.push("payload".into());
                params.push(record.to_document().to_string());
                Ok(insert(SqlDialect::MySql, &self.config.mariadb_table, &columns, params))
            }
            Destination::Redis => Ok(NativeWrite::Document {
                key: record.id.clone(),
                body: record.to_document(),
                ttl: Some(Duration::from_secs(self.config.redis_ttl_secs)),
            }),
            Destination::MongoDb => Ok(NativeWrite::Document {
                key: record.id.clone(),
                body: record.to_document(),
                ttl: self.config.mongodb_ttl_secs.map(Duration::from_secs),
            }),
            Destination::Unrecognized(tag) => Err(PipelineError::UnknownDestination(tag.clone())),
        }
    }

    /// Обработать одну запись. Ошибка возвращается только для ошибок
    /// данных (неизвестный destination при политике `reject`,
    /// невалидное имя колонки); сбой записи в backend — нет.
    pub async fn handle(&self, mut record: Record) -> Result<Acknowledgement, PipelineError> {
        record.stamp(&self.config.stage, &self.host);
        let destination = Destination::parse(&record.destination);
        self.dump(&destination, &record);

        if let Destination::Unrecognized(tag) = &destination {
            return match self.config.unknown_destination {
                UnknownDestinationPolicy::Reject => {
                    tracing::warn!(parent: self.diag.span(), id = %record.id, destination = %destination, "rejecting record with unrecognized destination");
                    Err(PipelineError::UnknownDestination(tag.clone()))
                }
                UnknownDestinationPolicy::Acknowledge => {
                    tracing::warn!(parent: self.diag.span(), id = %record.id, destination = %destination, "invalid destination, nothing written");
                    Ok(Acknowledgement::processed(&record))
                }
            };
        }

        let write = self.native_write(&destination, &record)?;
        match self.writers.get(&destination) {
            Some(writer) => {
                if let Err(e) = writer.write(&write).await {
                    tracing::error!(
                        parent: self.diag.span(),
                        id = %record.id,
                        destination = %destination,
                        writer = writer.name(),
                        error = %e,
                        "backend write failed"
                    );
                }
            }
            None => {
                tracing::warn!(parent: self.diag.span(), id = %record.id, destination = %destination, "no writer configured for destination");
            }
        }

        Ok(Acknowledgement::processed(&record))
    }

    fn dump(&self, destination: &Destination, record: &Record) {
        match self.diag.verbosity() {
            0 => {}
            1 => tracing::info!(
                parent: self.diag.span(),
                host = %self.host,
                destination = %destination,
                seq = record.field("seq").unwrap_or_default(),
                id = %record.id,
                "record received"
            ),
            _ => {
                let pretty = serde_json::to_string_pretty(record).unwrap_or_default();
                tracing::info!(parent: self.diag.span(), host = %self.host, destination = %destination, "record received\n{pretty}");
            }
        }
    }
}

/// (колонки, значения): uuid, поля в порядке записи, note, path.
fn relational_row(record: &Record) -> Result<(Vec<String>, Vec<String>), PipelineError> {
    let mut columns = Vec::with_capacity(record.fields.len() + 3);
    let mut params = Vec::with_capacity(record.fields.len() + 3);

    columns.push("uuid".to_string());
    params.push(record.id.clone());
    for field in &record.fields {
        check_identifier(&field.name)?;
        columns.push(field.name.clone());
        params.push(field.value.clone());
    }
    columns.push("note".to_string());
    params.push(record.note.clone());
    columns.push("path".to_string());
    params.push(record.provenance.as_str().to_string());

    Ok((columns, params))
}

fn insert(dialect: SqlDialect, table: &str, columns: &[String], params: Vec<String>) -> NativeWrite {
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| dialect.placeholder(n)).collect();
    NativeWrite::Relational {
        dialect,
        statement: format!("INSERT INTO {table} ({}) VALUES ({})", columns.join(", "), placeholders.join(", ")),
        params,
    }
}

impl RecordService for SinkRouter {
    fn post_data(&self, record: Record)
        -> Pin<Box<dyn Future<Output = Result<Acknowledgement, RelayError>> + Send + '_>>
    {
        Box::pin(async move { self.handle(record).await.map_err(RelayError::from) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use relay_api::{ErrorKind, Field, WriteShape, ACK_NOTE};

    use super::*;

    #[derive(Default)]
    struct RecordingWriter {
        name: &'static str,
        writes: Mutex<Vec<NativeWrite>>,
        fail: bool,
        /// None = принимает любую форму.
        only: Option<WriteShape>,
    }

    impl RecordingWriter {
        fn named(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, ..Default::default() })
        }

        fn count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }
    }

    impl BackendWriter for RecordingWriter {
        fn name(&self) -> &str {
            self.name
        }

        fn accepts(&self, shape: WriteShape) -> bool {
            self.only.is_none_or(|only| only == shape)
        }

        fn write<'a>(&'a self, write: &'a NativeWrite) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>> {
            Box::pin(async move {
                self.writes.lock().unwrap().push(write.clone());
                if self.fail {
                    return Err(RelayError::io("connection reset"));
                }
                Ok(())
            })
        }
    }

    fn record(destination: &str) -> Record {
        let mut r = Record::new(
            destination,
            vec![Field::new("seq", "1"), Field::new("first", "Ada"), Field::new("state", "CA")],
        );
        r.stamp("publish", "h1");
        r.stamp("relay", "h2");
        r
    }

    struct Fixture {
        router: SinkRouter,
        postgres: Arc<RecordingWriter>,
        redis: Arc<RecordingWriter>,
        mongo: Arc<RecordingWriter>,
        maria: Arc<RecordingWriter>,
    }

    fn fixture(config: SinkConfig) -> Fixture {
        let postgres = RecordingWriter::named("pg");
        let redis = RecordingWriter::named("redis");
        let mongo = RecordingWriter::named("mongo");
        let maria = RecordingWriter::named("maria");
        let router = SinkRouter::new(config, "sink-host".into(), Diagnostics::silent())
            .unwrap()
            .with_writer(Destination::Postgres, postgres.clone())
            .unwrap()
            .with_writer(Destination::Redis, redis.clone())
            .unwrap()
            .with_writer(Destination::MongoDb, mongo.clone())
            .unwrap()
            .with_writer(Destination::MariaDb, maria.clone())
            .unwrap();
        Fixture { router, postgres, redis, mongo, maria }
    }

    #[tokio::test]
    async fn postgres_record_goes_only_to_relational_writer() {
        let f = fixture(SinkConfig::default());
        let r = record("postgres");
        let ack = f.router.handle(r.clone()).await.unwrap();

        assert_eq!(f.postgres.count(), 1);
        assert_eq!(f.redis.count() + f.mongo.count() + f.maria.count(), 0);

        let writes = f.postgres.writes.lock().unwrap();
        let NativeWrite::Relational { statement, params, .. } = &writes[0] else {
            panic!("expected relational write");
        };
        assert_eq!(
            statement,
            "INSERT INTO person (uuid, seq, first, state, note, path) VALUES ($1, $2, $3, $4, $5, $6)"
        );
        assert_eq!(&params[..4], &[r.id.clone(), "1".into(), "Ada".into(), "CA".into()]);
        assert_eq!(params[5], ack.provenance);

        assert_eq!(ack.id, r.id);
        assert_eq!(ack.note, ACK_NOTE);
        let hops: Vec<String> = r.provenance.hops().iter().map(|h| h.stage.clone()).collect();
        assert_eq!(hops, vec!["publish", "relay"]);
        assert!(ack.provenance.starts_with(r.provenance.as_str()));
        assert!(ack.provenance.contains("sink:[sink-host,"));
    }

    #[tokio::test]
    async fn redis_gets_a_document_with_ttl() {
        let f = fixture(SinkConfig::default());
        let r = record("Redis");
        f.router.handle(r.clone()).await.unwrap();

        let writes = f.redis.writes.lock().unwrap();
        let NativeWrite::Document { key, body, ttl } = &writes[0] else {
            panic!("expected document write");
        };
        assert_eq!(key, &r.id);
        assert_eq!(body["first"], "Ada");
        assert_eq!(*ttl, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn mariadb_adds_json_payload_column() {
        let f = fixture(SinkConfig::default());
        f.router.handle(record("mariadb")).await.unwrap();

        let writes = f.maria.writes.lock().unwrap();
        let NativeWrite::Relational { statement, params, .. } = &writes[0] else {
            panic!("expected relational write");
        };
        assert!(statement.starts_with("INSERT INTO json.person (uuid, seq, first, state, note, path, payload)"));
        assert!(statement.ends_with("VALUES (?, ?, ?, ?, ?, ?, ?)"));
        assert_eq!(writes[0].shape(), WriteShape::Sql(SqlDialect::MySql));
        let payload: serde_json::Value = serde_json::from_str(params.last().unwrap()).unwrap();
        assert_eq!(payload["state"], "CA");
    }

    #[tokio::test]
    async fn unknown_destination_is_rejected_by_default() {
        let f = fixture(SinkConfig::default());
        let err = f.router.handle(record("unknown-value")).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownDestination(ref t) if t == "unknown-value"));
        assert_eq!(err.into_relay_error().kind(), ErrorKind::Format);
        assert_eq!(f.postgres.count() + f.redis.count() + f.mongo.count() + f.maria.count(), 0);
    }

    #[tokio::test]
    async fn unknown_destination_can_be_acknowledged() {
        let config = SinkConfig { unknown_destination: UnknownDestinationPolicy::Acknowledge, ..SinkConfig::default() };
        let f = fixture(config);
        let r = record("unknown-value");
        let ack = f.router.handle(r.clone()).await.unwrap();
        assert_eq!(ack.id, r.id);
        assert_eq!(ack.note, ACK_NOTE);
        assert_eq!(f.postgres.count() + f.redis.count() + f.mongo.count() + f.maria.count(), 0);
    }

    #[tokio::test]
    async fn writer_failure_is_still_acknowledged() {
        let failing = Arc::new(RecordingWriter { name: "pg", fail: true, ..Default::default() });
        let router = SinkRouter::new(SinkConfig::default(), "h".into(), Diagnostics::silent())
            .unwrap()
            .with_writer(Destination::Postgres, failing.clone())
            .unwrap();
        let ack = router.post_data(record("postgres")).await.unwrap();
        assert_eq!(ack.note, ACK_NOTE);
        assert_eq!(failing.count(), 1);
    }

    #[tokio::test]
    async fn missing_writer_is_acknowledged() {
        let router = SinkRouter::new(SinkConfig::default(), "h".into(), Diagnostics::silent()).unwrap();
        assert!(router.handle(record("mongodb")).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_column_name_is_a_data_error() {
        let f = fixture(SinkConfig::default());
        let mut r = record("postgres");
        r.fields.push(Field::new("x); DROP TABLE person; --", "1"));
        let err = f.router.handle(r).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidColumn(_)));
        assert_eq!(f.postgres.count(), 0);
    }

    #[test]
    fn writer_of_another_shape_cannot_be_registered() {
        let sql = Arc::new(RecordingWriter {
            name: "pg",
            only: Some(WriteShape::Sql(SqlDialect::Postgres)),
            ..Default::default()
        });
        let mut router = SinkRouter::new(SinkConfig::default(), "h".into(), Diagnostics::silent()).unwrap();

        for destination in [Destination::MongoDb, Destination::Redis, Destination::MariaDb] {
            let err = router.register(destination.clone(), sql.clone()).unwrap_err();
            assert!(err.is_config(), "{destination}: {err}");
            assert!(err.to_string().contains("cannot store"), "{err}");
        }
        assert!(router.register(Destination::Postgres, sql).is_ok());
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("person"));
        assert!(is_identifier("json.PERSON"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a..b"));
    }

    #[test]
    fn bad_table_name_is_a_config_error() {
        let config = SinkConfig { postgres_table: "person;".into(), ..SinkConfig::default() };
        assert!(SinkRouter::new(config, "h".into(), Diagnostics::silent()).is_err());
    }
}
