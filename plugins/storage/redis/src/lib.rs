//! Key-value backend writer: `SET <id> <json> PX <ttl>` через
//! мультиплексированное async-соединение.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;

use relay_api::{BackendWriter, NativeWrite, RelayError, WriteShape};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RedisWriterConfig {
    /// `redis://host:6379/0`
    pub url: String,
}

pub struct RedisWriter {
    name: String,
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
}

impl RedisWriter {
    pub fn new(name: impl Into<String>, config: &RedisWriterConfig) -> Result<Self, RelayError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| RelayError::config(format!("redis url: {e}")))?;
        Ok(Self { name: name.into(), client, conn: OnceCell::new() })
    }

    /// Соединение открывается при первой записи и переиспользуется.
    async fn connection(&self) -> Result<MultiplexedConnection, RelayError> {
        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(|e| RelayError::io(format!("{}: connect: {e}", self.name)))?;
        Ok(conn.clone())
    }

    async fn set(&self, key: &str, body: &serde_json::Value, ttl: Option<Duration>) -> Result<(), RelayError> {
        let value = serde_json::to_string(body)
            .map_err(|e| RelayError::format_err(format!("json serialize: {e}")))?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }

        let mut conn = self.connection().await?;
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| RelayError::io(format!("{}: SET {key}: {e}", self.name)))?;
        tracing::debug!(writer = %self.name, key, ttl_ms = ttl.map(|t| t.as_millis() as u64), "value stored");
        Ok(())
    }
}

impl BackendWriter for RedisWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, shape: WriteShape) -> bool {
        shape == WriteShape::Document
    }

    fn write<'a>(&'a self, write: &'a NativeWrite) -> Pin<Box<dyn Future<Output = Result<(), RelayError>> + Send + 'a>> {
        Box::pin(async move {
            match write {
                NativeWrite::Document { key, body, ttl } => self.set(key, body, *ttl).await,
                other => Err(RelayError::rejected(&self.name, other.shape().as_str())),
            }
        })
    }
}
