//! Document backend writer: один `insert_one` на запись.
//!
//! `_id` документа = id записи. TTL, если задан, пишется полем
//! `expire_at`: коллекция с TTL-индексом по нему удаляет документ сама.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use mongodb::bson::{self, Document};
use mongodb::options::ConnectionString;
use mongodb::Client;
use tokio::sync::OnceCell;

use relay_api::{now_ms, BackendWriter, NativeWrite, RelayError, WriteShape};

fn default_database() -> String {
    "relay".into()
}

fn default_collection() -> String {
    "person".into()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MongoWriterConfig {
    /// `mongodb://host:27017`
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

pub struct MongoWriter {
    name: String,
    url: String,
    database: String,
    collection: String,
    client: OnceCell<Client>,
}

impl MongoWriter {
    pub fn new(name: impl Into<String>, config: &MongoWriterConfig) -> Result<Self, RelayError> {
        ConnectionString::parse(&config.url).map_err(|e| RelayError::config(format!("mongodb url: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: config.url.clone(),
            database: config.database.clone(),
            collection: config.collection.clone(),
            client: OnceCell::new(),
        })
    }

    async fn client(&self) -> Result<&Client, RelayError> {
        self.client
            .get_or_try_init(|| Client::with_uri_str(&self.url))
            .await
            .map_err(|e| RelayError::io(format!("{}: connect: {e}", self.name)))
    }

    async fn insert(&self, key: &str, body: &serde_json::Value, ttl: Option<Duration>) -> Result<(), RelayError> {
        let doc = document(key, body, ttl)?;
        self.client()
            .await?
            .database(&self.database)
            .collection::<Document>(&self.collection)
            .insert_one(doc)
            .await
            .map_err(|e| RelayError::io(format!("{}: insert {key}: {e}", self.name)))?;
        tracing::debug!(writer = %self.name, key, collection = %self.collection, "document inserted");
        Ok(())
    }
}

fn document(key: &str, body: &serde_json::Value, ttl: Option<Duration>) -> Result<Document, RelayError> {
    let mut doc = bson::to_document(body).map_err(|e| RelayError::format_err(format!("bson: {e}")))?;
    doc.insert("_id", key);
    if let Some(ttl) = ttl {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        doc.insert("expire_at", bson::DateTime::from_millis(now_ms().saturating_add(ttl_ms)));
    }
    Ok(doc)
}

impl BackendWriter for MongoWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, shape: WriteShape) -> bool {
        shape == WriteShape::Document
    }

    fn write<'a>(&'a self, write: &'a NativeWrite) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>> {
        Box::pin(async move {
            match write {
                NativeWrite::Document { key, body, ttl } => self.insert(key, body, *ttl).await,
                other => Err(RelayError::rejected(&self.name, other.shape().as_str())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use relay_api::{ErrorKind, SqlDialect};

    use super::*;

    fn config(url: &str) -> MongoWriterConfig {
        MongoWriterConfig { url: url.into(), database: "relay".into(), collection: "person".into() }
    }

    #[test]
    fn config_from_toml_defaults() {
        let cfg: MongoWriterConfig = toml::from_str(r#"url = "mongodb://db:27017""#).unwrap();
        assert_eq!(cfg.database, "relay");
        assert_eq!(cfg.collection, "person");
    }

    #[test]
    fn invalid_url_is_a_config_error() {
        let err = MongoWriter::new("mongodb", &config("http://db:27017")).err().unwrap();
        assert!(err.is_config(), "{err}");
    }

    #[test]
    fn document_uses_record_id_and_optional_expiry() {
        let body = serde_json::json!({ "uuid": "id-1", "first": "Ada" });

        let doc = document("id-1", &body, None).unwrap();
        assert_eq!(doc.get_str("_id").unwrap(), "id-1");
        assert_eq!(doc.get_str("first").unwrap(), "Ada");
        assert!(!doc.contains_key("expire_at"));

        let doc = document("id-1", &body, Some(Duration::from_secs(60))).unwrap();
        assert!(doc.get_datetime("expire_at").unwrap().timestamp_millis() > now_ms());
    }

    #[test]
    fn non_object_body_is_a_format_error() {
        let err = document("k", &serde_json::json!([1, 2]), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[tokio::test]
    async fn relational_write_is_rejected_without_connecting() {
        let writer = MongoWriter::new("mongodb", &config("mongodb://127.0.0.1:1")).unwrap();
        let row = NativeWrite::Relational {
            dialect: SqlDialect::MySql,
            statement: "INSERT".into(),
            params: vec![],
        };
        assert!(!writer.accepts(row.shape()));
        let err = writer.write(&row).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[tokio::test]
    async fn unreachable_server_is_an_io_error() {
        let writer = MongoWriter::new(
            "mongodb",
            &config("mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200&connectTimeoutMS=200"),
        )
        .unwrap();
        let doc = NativeWrite::Document { key: "k".into(), body: serde_json::json!({ "uuid": "k" }), ttl: None };
        let err = writer.write(&doc).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io, "{err}");
    }
}
