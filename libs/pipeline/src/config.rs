use std::time::Duration;

use serde::Deserialize;

// ═══════════════════════════════════════════════════════════════
//  Line schema
// ═══════════════════════════════════════════════════════════════

/// Колонки исходного файла (fake person data), в порядке следования.
pub const DEFAULT_COLUMNS: [&str; 16] = [
    "seq", "alpha", "first", "last", "birthday", "gender", "email", "street", "state", "city",
    "zip", "ccnumber", "date", "latitude", "longitude", "dollar",
];

/// Разметка входного файла: колонки, разделитель, колонка-ключ партиции.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Значение этой колонки уходит в queue как partition key.
    #[serde(default = "default_key_column")]
    pub key_column: String,
    /// Первая строка файла — заголовок.
    #[serde(default = "default_true")]
    pub skip_header: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            delimiter: default_delimiter(),
            key_column: default_key_column(),
            skip_header: true,
        }
    }
}

fn default_columns() -> Vec<String> {
    DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect()
}
fn default_delimiter() -> String {
    ",".into()
}
fn default_key_column() -> String {
    "state".into()
}
fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════
//  Publisher
// ═══════════════════════════════════════════════════════════════

/// Что делать, если publish не смог поставить сообщение в очередь.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorPolicy {
    /// Залогировать, посчитать и продолжить со следующей строки.
    #[default]
    #[serde(alias = "skip_and_continue")]
    Skip,
    /// Остановить publish-цикл (shutdown handshake всё равно выполняется).
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    pub topic: String,
    /// Тег destination или пункт меню 1..4.
    pub destination: String,
    /// Максимум строк данных. None или 0 — без ограничения.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default)]
    pub on_publish_error: PublishErrorPolicy,
    #[serde(default = "default_publish_stage")]
    pub stage: String,
}

impl PublisherConfig {
    pub fn new(topic: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            destination: destination.into(),
            limit: None,
            flush_timeout_ms: default_flush_timeout_ms(),
            on_publish_error: PublishErrorPolicy::default(),
            stage: default_publish_stage(),
        }
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Эффективный лимит: 0 трактуется как «без ограничения».
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|&n| n > 0)
    }
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}
fn default_publish_stage() -> String {
    relay_api::stage::PUBLISH.into()
}

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberConfig {
    pub topic: String,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_relay_stage")]
    pub stage: String,
}

impl SubscriberConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            poll_timeout_ms: default_poll_timeout_ms(),
            stage: default_relay_stage(),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_relay_stage() -> String {
    relay_api::stage::RELAY.into()
}

// ═══════════════════════════════════════════════════════════════
//  Sink router
// ═══════════════════════════════════════════════════════════════

/// Поведение роутера для записи с неизвестным destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownDestinationPolicy {
    /// Ошибка данных: запись не подтверждается.
    #[default]
    Reject,
    /// Залогировать и подтвердить, ничего не записав.
    Acknowledge,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_table")]
    pub postgres_table: String,
    #[serde(default = "default_mariadb_table")]
    pub mariadb_table: String,
    #[serde(default = "default_redis_ttl_secs")]
    pub redis_ttl_secs: u64,
    /// None — документы mongodb без срока жизни.
    #[serde(default)]
    pub mongodb_ttl_secs: Option<u64>,
    #[serde(default)]
    pub unknown_destination: UnknownDestinationPolicy,
    #[serde(default = "default_sink_stage")]
    pub stage: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            postgres_table: default_table(),
            mariadb_table: default_mariadb_table(),
            redis_ttl_secs: default_redis_ttl_secs(),
            mongodb_ttl_secs: None,
            unknown_destination: UnknownDestinationPolicy::default(),
            stage: default_sink_stage(),
        }
    }
}

fn default_table() -> String {
    "person".into()
}
fn default_mariadb_table() -> String {
    "json.person".into()
}
fn default_redis_ttl_secs() -> u64 {
    60
}
fn default_sink_stage() -> String {
    relay_api::stage::SINK.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_defaults_from_empty_toml() {
        let cfg: SinkConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.postgres_table, "person");
        assert_eq!(cfg.redis_ttl_secs, 60);
        assert_eq!(cfg.unknown_destination, UnknownDestinationPolicy::Reject);
        assert_eq!(cfg.stage, "sink");
    }

    #[test]
    fn publisher_policy_aliases() {
        let cfg: PublisherConfig = toml::from_str(
            r#"
            topic = "persons"
            destination = "1"
            limit = 0
            on_publish_error = "skip_and_continue"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.on_publish_error, PublishErrorPolicy::Skip);
        assert_eq!(cfg.effective_limit(), None);
        assert_eq!(cfg.flush_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn schema_defaults() {
        let cfg = SchemaConfig::default();
        assert_eq!(cfg.columns.len(), 16);
        assert_eq!(cfg.key_column, "state");
        assert!(cfg.skip_header);
    }
}
