use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use relay_api::{now_ms, RelayError};

use crate::consumer::{ConsumerConfig, MemoryConsumer};
use crate::error::QueueError;
use crate::producer::{MemoryProducer, ProducerConfig};

// ═══════════════════════════════════════════════════════════════
//  Provisioning
// ═══════════════════════════════════════════════════════════════

fn default_partitions() -> u32 {
    1
}

/// Параметры создания topic'а (административный шаг, не часть
/// контракта producer/consumer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Сообщения старше retention удаляются из начала лога при append.
    #[serde(default)]
    pub retention: Option<Duration>,
}

impl Default for TopicSpec {
    fn default() -> Self {
        Self { partitions: default_partitions(), retention: None }
    }
}

fn default_max_message_bytes() -> usize {
    1_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { max_message_bytes: default_max_message_bytes() }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Partition log
// ═══════════════════════════════════════════════════════════════

pub(crate) struct Entry {
    pub ts_ms: i64,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Append-only лог одной партиции. `start` — offset первой хранимой
/// записи (растёт при retention).
#[derive(Default)]
pub(crate) struct PartitionLog {
    pub start: u64,
    pub entries: VecDeque<Entry>,
}

impl PartitionLog {
    pub fn end(&self) -> u64 {
        self.start + self.entries.len() as u64
    }

    pub fn get(&self, offset: u64) -> Option<&Entry> {
        let idx = offset.checked_sub(self.start)?;
        self.entries.get(idx as usize)
    }

    fn append(&mut self, entry: Entry) -> u64 {
        let offset = self.end();
        self.entries.push_back(entry);
        offset
    }

    fn expire(&mut self, cutoff_ms: i64) {
        while self.entries.front().is_some_and(|e| e.ts_ms < cutoff_ms) {
            self.entries.pop_front();
            self.start += 1;
        }
    }
}

pub(crate) struct TopicLog {
    pub spec: TopicSpec,
    pub partitions: Vec<PartitionLog>,
    round_robin: u32,
}

impl TopicLog {
    fn partition_for(&mut self, key: &[u8]) -> u32 {
        let n = self.spec.partitions;
        if key.is_empty() {
            let p = self.round_robin % n;
            self.round_robin = self.round_robin.wrapping_add(1);
            return p;
        }
        key_hash(key) % n
    }
}

/// FNV-1a: стабилен между запусками, в отличие от DefaultHasher.
fn key_hash(key: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in key {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

// ═══════════════════════════════════════════════════════════════
//  Broker state
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
pub(crate) struct BrokerState {
    pub topics: HashMap<String, TopicLog>,
    /// (group, topic, partition) → следующий offset для чтения.
    pub committed: HashMap<(String, String, u32), u64>,
    pub fault: Option<RelayError>,
}

pub(crate) struct Shared {
    state: Mutex<BrokerState>,
    /// Будит consumer'ов, ожидающих в poll.
    pub appended: Notify,
    pub config: BrokerConfig,
}

impl Shared {
    /// Критические секции короткие и без await, поэтому std Mutex.
    pub fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process partitioned broker: durable на время жизни процесса.
///
/// Дешёвый `Clone`: все клоны разделяют одно состояние.
#[derive(Clone)]
pub struct MemoryBroker {
    pub(crate) shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl MemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
                config,
            }),
        }
    }

    pub fn create_topic(&self, name: &str, spec: TopicSpec) -> Result<(), QueueError> {
        if spec.partitions == 0 {
            return Err(QueueError::InvalidSpec {
                topic: name.to_string(),
                detail: "partitions must be > 0".into(),
            });
        }
        let mut state = self.shared.lock();
        if state.topics.contains_key(name) {
            return Err(QueueError::TopicExists(name.to_string()));
        }
        let partitions = (0..spec.partitions).map(|_| PartitionLog::default()).collect();
        state.topics.insert(name.to_string(), TopicLog { spec, partitions, round_robin: 0 });
        tracing::info!(topic = %name, "topic created");
        Ok(())
    }

    /// Создать topic, если его ещё нет. Возвращает true, если создан.
    pub fn ensure_topic(&self, name: &str, spec: TopicSpec) -> Result<bool, QueueError> {
        match self.create_topic(name, spec) {
            Ok(()) => Ok(true),
            Err(QueueError::TopicExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Сколько сообщений topic'а группа ещё не получила. Партиция без
    /// закоммиченного offset'а считается с начала лога.
    pub fn lag(&self, group: &str, topic: &str) -> Option<u64> {
        let state = self.shared.lock();
        let log = state.topics.get(topic)?;
        let lag = log
            .partitions
            .iter()
            .enumerate()
            .map(|(p, part)| {
                let committed = state
                    .committed
                    .get(&(group.to_string(), topic.to_string(), p as u32))
                    .copied()
                    .unwrap_or(part.start)
                    .max(part.start);
                part.end().saturating_sub(committed)
            })
            .sum();
        Some(lag)
    }

    /// Перевести брокер в состояние отказа: consumer'ы получат
    /// терминальный `Error`, новые сообщения не принимаются.
    pub fn fail(&self, error: RelayError) {
        tracing::warn!(error = %error, "broker fault injected");
        self.shared.lock().fault = Some(error);
        self.shared.appended.notify_waiters();
    }

    /// Producer с фоновой delivery-задачей. Требует tokio runtime.
    pub fn producer(&self, config: ProducerConfig) -> MemoryProducer {
        MemoryProducer::new(self.clone(), config)
    }

    pub fn consumer(&self, config: ConsumerConfig) -> MemoryConsumer {
        MemoryConsumer::new(self.clone(), config)
    }

    /// Записать сообщение в лог партиции. Возвращает (partition, offset).
    pub(crate) fn append(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> Result<(u32, u64), QueueError> {
        let max = self.shared.config.max_message_bytes;
        if payload.len() > max {
            return Err(QueueError::MessageTooLarge { size: payload.len(), max });
        }

        let mut state = self.shared.lock();
        if let Some(fault) = &state.fault {
            return Err(QueueError::Fault(fault.clone()));
        }
        let log = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| QueueError::UnknownTopic(topic.to_string()))?;

        let partition = log.partition_for(key);
        let ts_ms = now_ms();
        let retention = log.spec.retention;
        let part = &mut log.partitions[partition as usize];
        if let Some(retention) = retention {
            let window = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
            part.expire(ts_ms.saturating_sub(window));
        }
        let offset = part.append(Entry { ts_ms, key: key.to_vec(), payload });
        drop(state);

        self.shared.appended.notify_waiters();
        Ok((partition, offset))
    }
}
