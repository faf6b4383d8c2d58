//! Queue Client: at-least-once, partitioned publish/subscribe.
//!
//! `MemoryBroker` — in-process реализация (durable на время жизни
//! процесса), с feature `kafka` — реализация поверх librdkafka.

pub mod broker;
pub mod consumer;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod producer;

pub use broker::{BrokerConfig, MemoryBroker, TopicSpec};
pub use consumer::{ConsumerConfig, MemoryConsumer, OffsetReset};
pub use error::QueueError;
pub use producer::{MemoryProducer, MpscDeliveryStream, ProducerConfig};

#[cfg(feature = "kafka")]
pub use kafka::{ensure_topic, KafkaConfig, KafkaConsumer, KafkaProducer};
