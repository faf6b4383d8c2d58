//! Queue Client поверх librdkafka. Те же трейты, что и у `MemoryBroker`,
//! поэтому publisher/subscriber не различают backend.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::FromClientConfigAndContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, ClientContext};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use relay_api::{
    DeliveryEvent, DeliveryOutcome, DeliveryStream, ProducerEvent, QueueConsumer, QueueEvent,
    QueueMessage, QueueProducer, RelayError,
};

use crate::broker::TopicSpec;
use crate::consumer::{ConsumerConfig, OffsetReset};
use crate::error::QueueError;
use crate::producer::MpscDeliveryStream;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// `bootstrap.servers`.
    pub brokers: String,
    /// Дополнительные librdkafka-опции как есть.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl KafkaConfig {
    fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.brokers);
        for (k, v) in &self.options {
            cfg.set(k, v);
        }
        cfg
    }
}

// ═══════════════════════════════════════════════════════════════
//  Producer
// ═══════════════════════════════════════════════════════════════

/// Перехватывает delivery reports и ошибки клиента и пересылает их
/// в поток событий producer'а.
struct DeliveryForwarder {
    tx: Mutex<Option<mpsc::UnboundedSender<ProducerEvent>>>,
}

impl DeliveryForwarder {
    fn forward(&self, event: ProducerEvent) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl ClientContext for DeliveryForwarder {
    fn error(&self, error: KafkaError, reason: &str) {
        let fatal = error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal);
        tracing::error!(error = %error, reason, fatal, "kafka client error");
        self.forward(ProducerEvent::Error(RelayError::io(format!("{error}: {reason}"))));
    }
}

impl ProducerContext for DeliveryForwarder {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        let event = match result {
            Ok(msg) => DeliveryEvent {
                topic: msg.topic().to_string(),
                key: msg.key().unwrap_or_default().to_vec(),
                payload: msg.payload().unwrap_or_default().to_vec(),
                outcome: DeliveryOutcome::Delivered {
                    partition: msg.partition().max(0) as u32,
                    offset: msg.offset().max(0) as u64,
                },
            },
            Err((e, msg)) => DeliveryEvent {
                topic: msg.topic().to_string(),
                key: msg.key().unwrap_or_default().to_vec(),
                payload: msg.payload().unwrap_or_default().to_vec(),
                outcome: DeliveryOutcome::Failed(RelayError::io(e.to_string())),
            },
        };
        self.forward(ProducerEvent::Delivery(event));
    }
}

pub struct KafkaProducer {
    producer: Arc<ThreadedProducer<DeliveryForwarder>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ProducerEvent>>>,
    closed: AtomicBool,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, QueueError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = DeliveryForwarder { tx: Mutex::new(Some(tx)) };
        let producer = ThreadedProducer::from_config_and_context(&config.client_config(), context)?;
        tracing::info!(brokers = %config.brokers, "kafka producer created");
        Ok(Self {
            producer: Arc::new(producer),
            events: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        })
    }
}

impl QueueProducer for KafkaProducer {
    fn publish(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> Result<(), RelayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed.into());
        }
        let record = BaseRecord::<[u8], [u8], ()>::to(topic).key(key).payload(&payload);
        self.producer
            .send(record)
            .map_err(|(err, _record)| QueueError::Kafka(err).into_relay_error())
    }

    fn deliveries(&self) -> Result<Box<dyn DeliveryStream>, RelayError> {
        let rx = self
            .events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| RelayError::closed("delivery stream already taken"))?;
        Ok(Box::new(MpscDeliveryStream::new(rx)))
    }

    fn flush(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        let producer = self.producer.clone();
        Box::pin(async move {
            let fallback = producer.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = producer.flush(timeout) {
                    tracing::warn!(error = %e, "kafka flush incomplete");
                }
                producer.in_flight_count().max(0) as usize
            })
            .await
            .unwrap_or_else(|_| fallback.in_flight_count().max(0) as usize)
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.producer.context().tx.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer
// ═══════════════════════════════════════════════════════════════

pub struct KafkaConsumer {
    consumer: StreamConsumer,
    /// Следующий offset по (topic, partition) для PartitionEnd.
    positions: HashMap<(String, u32), u64>,
    topics: Vec<String>,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig, consumer: &ConsumerConfig) -> Result<Self, QueueError> {
        let reset = match consumer.auto_offset_reset {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        };
        let mut cfg = config.client_config();
        cfg.set("group.id", &consumer.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", reset)
            .set("enable.partition.eof", if consumer.partition_eof { "true" } else { "false" });
        let consumer: StreamConsumer = cfg.create()?;
        Ok(Self { consumer, positions: HashMap::new(), topics: Vec::new() })
    }
}

impl QueueConsumer for KafkaConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), RelayError> {
        self.topics.push(topic.to_string());
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics).map_err(|e| QueueError::Kafka(e).into_relay_error())
    }

    fn poll(&mut self, timeout: Duration) -> Pin<Box<dyn Future<Output = Option<QueueEvent>> + Send + '_>> {
        Box::pin(async move {
            let received = tokio::time::timeout(timeout, self.consumer.recv()).await.ok()?;
            let event = match received {
                Ok(msg) => {
                    let partition = msg.partition().max(0) as u32;
                    let offset = msg.offset().max(0) as u64;
                    let topic = msg.topic().to_string();
                    let message = QueueMessage {
                        topic: topic.clone(),
                        partition,
                        offset,
                        key: msg.key().unwrap_or_default().to_vec(),
                        payload: msg.payload().unwrap_or_default().to_vec(),
                    };
                    self.positions.insert((topic, partition), offset + 1);
                    QueueEvent::Message(message)
                }
                Err(KafkaError::PartitionEOF(p)) => {
                    let partition = p.max(0) as u32;
                    let topic = self.topics.first().cloned().unwrap_or_default();
                    let offset = self.positions.get(&(topic.clone(), partition)).copied().unwrap_or(0);
                    QueueEvent::PartitionEnd { topic, partition, offset }
                }
                Err(e) => QueueEvent::Error(QueueError::Kafka(e).into_relay_error()),
            };
            Some(event)
        })
    }

    fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Provisioning
// ═══════════════════════════════════════════════════════════════

/// Создать topic, если его нет. Возвращает true, если создан.
pub async fn ensure_topic(
    config: &KafkaConfig,
    name: &str,
    spec: &TopicSpec,
    replication: i32,
) -> Result<bool, QueueError> {
    let admin: AdminClient<DefaultClientContext> = config.client_config().create()?;
    let retention_ms = spec.retention.map(|r| r.as_millis().to_string());
    let mut topic = NewTopic::new(name, spec.partitions as i32, TopicReplication::Fixed(replication));
    if let Some(ms) = retention_ms.as_deref() {
        topic = topic.set("retention.ms", ms);
    }

    let results = admin.create_topics(&[topic], &AdminOptions::new()).await?;
    for result in results {
        match result {
            Ok(created) => {
                tracing::info!(topic = %created, partitions = spec.partitions, "kafka topic created");
            }
            Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => return Ok(false),
            Err((topic, code)) => {
                return Err(QueueError::InvalidSpec { topic, detail: code.to_string() });
            }
        }
    }
    Ok(true)
}
