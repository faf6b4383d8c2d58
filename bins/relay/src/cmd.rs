pub mod publish;
pub mod run;
pub mod serve;
pub mod subscribe;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pipeline::{Diagnostics, SinkRouter};
use relay_api::{BackendWriter, Destination, QueueConsumer, QueueProducer};
use storage_file::FileWriter;
use storage_mariadb::MariaDbWriter;
use storage_memory::MemoryWriter;
use storage_mongodb::MongoWriter;
use storage_postgres::PostgresWriter;
use storage_redis::RedisWriter;

use crate::config::{BackendConfig, QueueBackend, RelayConfig};
use crate::error::AppError;

/// Отменить `token` по Ctrl+C.
pub(crate) fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutting down..."),
            Err(e) => tracing::error!(error = %e, "cannot listen for Ctrl+C"),
        }
        token.cancel();
    });
}

// ═══════════════════════════════════════════════════════════════
//  Sink: writers по [backends.<dest>]
// ═══════════════════════════════════════════════════════════════

pub(crate) fn build_writer(tag: &str, backend: &BackendConfig) -> Result<Arc<dyn BackendWriter>, AppError> {
    let writer: Result<Arc<dyn BackendWriter>, _> = match backend {
        BackendConfig::Memory(c) => Ok(Arc::new(MemoryWriter::new(tag, c))),
        BackendConfig::File(c) => Ok(Arc::new(FileWriter::new(tag, c))),
        BackendConfig::Postgres(c) => PostgresWriter::new(tag, c).map(|w| Arc::new(w) as _),
        BackendConfig::Redis(c) => RedisWriter::new(tag, c).map(|w| Arc::new(w) as _),
        BackendConfig::Mariadb(c) => MariaDbWriter::new(tag, c).map(|w| Arc::new(w) as _),
        BackendConfig::Mongodb(c) => MongoWriter::new(tag, c).map(|w| Arc::new(w) as _),
    };
    writer.map_err(|e| AppError::relay("backends", e))
}

pub(crate) fn build_router(cfg: &RelayConfig) -> Result<SinkRouter, AppError> {
    let diag = Diagnostics::new("sink", cfg.verbosity());
    let mut router = SinkRouter::new(cfg.sink.clone(), cfg.host(), diag)?;

    for (tag, backend) in &cfg.backends {
        let destination = Destination::parse(tag);
        if !destination.is_known() {
            return Err(AppError::config("backends", format!("unknown destination '{tag}'")));
        }
        // kind, не умеющий форму записи destination'а (mongodb → postgres,
        // redis → mariadb), отвергается здесь, а не на первой записи.
        router
            .register(destination, build_writer(tag, backend)?)
            .map_err(|e| AppError::config("backends", format!("[backends.{tag}] kind = \"{}\": {e}", backend.kind())))?;
        tracing::info!(destination = %tag, kind = backend.kind(), "backend configured");
    }
    if cfg.backends.is_empty() {
        tracing::warn!("no [backends] configured: records are acknowledged without being stored");
    }
    Ok(router)
}

// ═══════════════════════════════════════════════════════════════
//  Queue: shared broker для отдельных процессов
// ═══════════════════════════════════════════════════════════════

fn shared_broker_required(stage: &str) -> AppError {
    AppError::config(
        "queue",
        format!("'{stage}' as a separate process needs a shared broker: set queue.backend = \"kafka\" or use 'relay run'"),
    )
}

#[cfg(feature = "kafka")]
pub(crate) async fn shared_producer(cfg: &RelayConfig) -> Result<Arc<dyn QueueProducer>, AppError> {
    match cfg.queue.backend {
        QueueBackend::Memory => Err(shared_broker_required("publish")),
        QueueBackend::Kafka => {
            let kafka = cfg.kafka_config();
            // Producer создаётся первым: битые опции клиента — Config,
            // до обращения к брокеру.
            let producer = queue_engine::KafkaProducer::new(&kafka)?;
            let created =
                queue_engine::ensure_topic(&kafka, &cfg.queue.topic, &cfg.topic_spec(), cfg.queue.replication).await?;
            tracing::info!(topic = %cfg.queue.topic, created, "kafka topic ready");
            Ok(Arc::new(producer))
        }
    }
}

#[cfg(not(feature = "kafka"))]
pub(crate) async fn shared_producer(cfg: &RelayConfig) -> Result<Arc<dyn QueueProducer>, AppError> {
    match cfg.queue.backend {
        QueueBackend::Memory => Err(shared_broker_required("publish")),
        QueueBackend::Kafka => Err(kafka_disabled()),
    }
}

#[cfg(feature = "kafka")]
pub(crate) fn shared_consumer(cfg: &RelayConfig) -> Result<Box<dyn QueueConsumer>, AppError> {
    match cfg.queue.backend {
        QueueBackend::Memory => Err(shared_broker_required("subscribe")),
        QueueBackend::Kafka => Ok(Box::new(queue_engine::KafkaConsumer::new(
            &cfg.kafka_config(),
            &cfg.consumer_config(),
        )?)),
    }
}

#[cfg(not(feature = "kafka"))]
pub(crate) fn shared_consumer(cfg: &RelayConfig) -> Result<Box<dyn QueueConsumer>, AppError> {
    match cfg.queue.backend {
        QueueBackend::Memory => Err(shared_broker_required("subscribe")),
        QueueBackend::Kafka => Err(kafka_disabled()),
    }
}

#[cfg(not(feature = "kafka"))]
fn kafka_disabled() -> AppError {
    AppError::config("queue", "relay was built without the 'kafka' feature")
}
