use std::collections::BTreeMap;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use pipeline::{PublishErrorPolicy, PublisherConfig, SchemaConfig, SinkConfig, SubscriberConfig};
use queue_engine::{BrokerConfig, ConsumerConfig, OffsetReset, ProducerConfig, TopicSpec};
use relay_rpc::RpcClientConfig;
use storage_file::FileWriterConfig;
use storage_mariadb::MariaDbWriterConfig;
use storage_memory::MemoryWriterConfig;
use storage_mongodb::MongoWriterConfig;
use storage_postgres::PostgresWriterConfig;
use storage_redis::RedisWriterConfig;

use crate::error::AppError;

// ═══════════════════════════════════════════════════════════════
//  CLI
// ═══════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(name = "relay", about = "Файл → очередь → RPC → хранилище")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Прочитать файл и опубликовать записи в очередь
    Publish(SourceArgs),
    /// Читать очередь и пересылать записи в sink по RPC
    Subscribe(SubscribeArgs),
    /// Запустить sink: RPC-сервер с роутером по backend'ам
    Serve(ServeArgs),
    /// Все стадии в одном процессе поверх in-process брокера
    Run(RunArgs),
}

#[derive(Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, global = true, default_value = "relay.toml", env = "RELAY_CONFIG")]
    pub config: String,

    /// Уровень диагностики 0..4
    #[arg(long, global = true, env = "RELAY_VERBOSITY")]
    pub verbosity: Option<u8>,

    /// Имя хоста в provenance (по умолчанию — системное)
    #[arg(long, global = true, env = "RELAY_HOSTNAME")]
    pub hostname: Option<String>,

    #[arg(long, global = true, env = "RELAY_TOPIC")]
    pub topic: Option<String>,

    /// bootstrap-серверы kafka
    #[arg(long, global = true, env = "RELAY_BROKERS")]
    pub brokers: Option<String>,
}

#[derive(Args, Clone, Debug, Default)]
pub struct SourceArgs {
    /// Входной файл (первая строка — заголовок)
    #[arg(long, env = "RELAY_FILE")]
    pub file: Option<String>,

    /// postgres | redis | mongodb | mariadb, или пункт меню 1..4
    #[arg(long = "dest", env = "RELAY_DEST")]
    pub destination: Option<String>,

    /// Максимум строк данных (0 = все)
    #[arg(long, env = "RELAY_LIMIT")]
    pub limit: Option<usize>,
}

#[derive(Args, Clone, Debug)]
pub struct SubscribeArgs {
    /// Consumer group
    #[arg(long, env = "RELAY_GROUP")]
    pub group: Option<String>,

    /// Адрес RPC-сервера sink'а
    #[arg(long = "rpc", env = "RELAY_RPC_ADDRESS")]
    pub rpc_address: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Адрес, на котором слушает RPC-сервер
    #[arg(long, env = "RELAY_LISTEN")]
    pub listen: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(long, env = "RELAY_LISTEN")]
    pub listen: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Ключ — тег destination.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub hostname: Option<String>,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { hostname: None, verbosity: default_verbosity() }
    }
}

fn default_verbosity() -> u8 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    pub file: Option<String>,
    pub destination: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub on_publish_error: PublishErrorPolicy,
    #[serde(flatten)]
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    Memory,
    Kafka,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub topic: String,
    pub partitions: u32,
    pub replication: i32,
    pub retention_ms: Option<u64>,
    pub group: String,
    pub offset_reset: OffsetReset,
    pub partition_eof: bool,
    pub flush_timeout_ms: u64,
    pub poll_timeout_ms: u64,
    pub max_message_bytes: usize,
    pub linger_ms: u64,
    pub brokers: String,
    /// Дополнительные librdkafka-опции.
    pub options: BTreeMap<String, String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            topic: "persons".into(),
            partitions: 1,
            replication: 1,
            retention_ms: None,
            group: "relay".into(),
            offset_reset: OffsetReset::Earliest,
            partition_eof: true,
            flush_timeout_ms: 10_000,
            poll_timeout_ms: 100,
            max_message_bytes: 1_000_000,
            linger_ms: 5,
            brokers: "localhost:9092".into(),
            options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub listen: String,
    pub address: String,
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        let client = RpcClientConfig::default();
        Self { listen: "0.0.0.0:50051".into(), address: client.address, timeout_ms: client.timeout_ms }
    }
}

/// Реализация backend writer'а для одного destination.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Memory(MemoryWriterConfig),
    File(FileWriterConfig),
    Postgres(PostgresWriterConfig),
    Redis(RedisWriterConfig),
    Mariadb(MariaDbWriterConfig),
    Mongodb(MongoWriterConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Memory(_) => "memory",
            BackendConfig::File(_) => "file",
            BackendConfig::Postgres(_) => "postgres",
            BackendConfig::Redis(_) => "redis",
            BackendConfig::Mariadb(_) => "mariadb",
            BackendConfig::Mongodb(_) => "mongodb",
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Load + merge: config.toml < env/CLI
// ═══════════════════════════════════════════════════════════════

impl RelayConfig {
    /// Отсутствующий файл допустим и даёт конфигурацию по умолчанию.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(config = %path, "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(AppError::Config { context: "read", detail: format!("'{path}': {e}") }),
        };
        Self::parse(&content).map_err(|detail| AppError::Config { context: "parse", detail: format!("'{path}': {detail}") })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn apply_global(&mut self, args: &GlobalArgs) {
        if let Some(v) = args.verbosity {
            self.general.verbosity = v;
        }
        if let Some(h) = &args.hostname {
            self.general.hostname = Some(h.clone());
        }
        if let Some(t) = &args.topic {
            self.queue.topic = t.clone();
        }
        if let Some(b) = &args.brokers {
            self.queue.brokers = b.clone();
        }
    }

    pub fn apply_source(&mut self, args: &SourceArgs) {
        if let Some(f) = &args.file {
            self.source.file = Some(f.clone());
        }
        if let Some(d) = &args.destination {
            self.source.destination = Some(d.clone());
        }
        if args.limit.is_some() {
            self.source.limit = args.limit;
        }
    }

    pub fn apply_subscribe(&mut self, args: &SubscribeArgs) {
        if let Some(g) = &args.group {
            self.queue.group = g.clone();
        }
        if let Some(a) = &args.rpc_address {
            self.rpc.address = a.clone();
        }
    }

    pub fn apply_listen(&mut self, listen: Option<&String>) {
        if let Some(l) = listen {
            self.rpc.listen = l.clone();
        }
    }

    // ── Derived component configs ──

    pub fn host(&self) -> String {
        relay_api::host_identity(self.general.hostname.as_deref())
    }

    pub fn verbosity(&self) -> u8 {
        self.general.verbosity
    }

    pub fn source_file(&self) -> Result<&str, AppError> {
        self.source
            .file
            .as_deref()
            .ok_or_else(|| AppError::Config { context: "source", detail: "file is required (--file)".into() })
    }

    pub fn publisher_config(&self) -> Result<PublisherConfig, AppError> {
        let destination = self.source.destination.clone().ok_or_else(|| AppError::Config {
            context: "source",
            detail: "destination is required (--dest)".into(),
        })?;
        Ok(PublisherConfig {
            limit: self.source.limit,
            flush_timeout_ms: self.queue.flush_timeout_ms,
            on_publish_error: self.source.on_publish_error,
            ..PublisherConfig::new(self.queue.topic.clone(), destination)
        })
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig { poll_timeout_ms: self.queue.poll_timeout_ms, ..SubscriberConfig::new(self.queue.topic.clone()) }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            auto_offset_reset: self.queue.offset_reset,
            partition_eof: self.queue.partition_eof,
            ..ConsumerConfig::new(self.queue.group.clone())
        }
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig { linger: Duration::from_millis(self.queue.linger_ms) }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig { max_message_bytes: self.queue.max_message_bytes }
    }

    pub fn topic_spec(&self) -> TopicSpec {
        TopicSpec {
            partitions: self.queue.partitions,
            retention: self.queue.retention_ms.map(Duration::from_millis),
        }
    }

    pub fn rpc_client_config(&self) -> RpcClientConfig {
        RpcClientConfig { address: self.rpc.address.clone(), timeout_ms: self.rpc.timeout_ms }
    }

    #[cfg(feature = "kafka")]
    pub fn kafka_config(&self) -> queue_engine::KafkaConfig {
        let mut options = self.queue.options.clone();
        options
            .entry("message.max.bytes".into())
            .or_insert_with(|| self.queue.max_message_bytes.to_string());
        queue_engine::KafkaConfig { brokers: self.queue.brokers.clone(), options }
    }
}
