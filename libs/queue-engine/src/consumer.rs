use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use relay_api::{QueueConsumer, QueueEvent, QueueMessage, RelayError};

use crate::broker::MemoryBroker;
use crate::error::QueueError;

/// Откуда начинать чтение, если у группы нет закоммиченного offset'а.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub group_id: String,
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,
    /// Выдавать `PartitionEnd` при достижении конца партиции.
    #[serde(default = "default_true")]
    pub partition_eof: bool,
}

impl ConsumerConfig {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self { group_id: group_id.into(), auto_offset_reset: OffsetReset::default(), partition_eof: true }
    }
}

type Slot = (String, u32);

/// Group-based consumer поверх `MemoryBroker`.
///
/// Offset коммитится в группу сразу при выдаче сообщения (auto-commit):
/// следующий consumer той же группы продолжит после последнего
/// выданного сообщения.
pub struct MemoryConsumer {
    broker: MemoryBroker,
    config: ConsumerConfig,
    slots: Vec<Slot>,
    positions: HashMap<Slot, u64>,
    eof_sent: HashSet<Slot>,
    cursor: usize,
    closed: bool,
}

impl MemoryConsumer {
    pub(crate) fn new(broker: MemoryBroker, config: ConsumerConfig) -> Self {
        Self {
            broker,
            config,
            slots: Vec::new(),
            positions: HashMap::new(),
            eof_sent: HashSet::new(),
            cursor: 0,
            closed: false,
        }
    }

    pub fn position(&self, topic: &str, partition: u32) -> Option<u64> {
        self.positions.get(&(topic.to_string(), partition)).copied()
    }

    /// Следующее готовое событие без ожидания. Партиции обходятся
    /// по кругу, внутри партиции порядок = порядок offset'ов.
    fn next_ready(&mut self) -> Option<QueueEvent> {
        let mut state = self.broker.shared.lock();
        if let Some(fault) = &state.fault {
            return Some(QueueEvent::Error(fault.clone()));
        }

        let n = self.slots.len();
        for i in 0..n {
            let idx = (self.cursor + i) % n;
            let slot = &self.slots[idx];
            let Some(log) = state.topics.get(&slot.0) else {
                return Some(QueueEvent::Error(QueueError::UnknownTopic(slot.0.clone()).into()));
            };
            let part = &log.partitions[slot.1 as usize];
            let pos = self.positions.get(slot).copied().unwrap_or(part.start).max(part.start);

            if let Some(entry) = part.get(pos) {
                let message = QueueMessage {
                    topic: slot.0.clone(),
                    partition: slot.1,
                    offset: pos,
                    key: entry.key.clone(),
                    payload: entry.payload.clone(),
                };
                let slot = slot.clone();
                state
                    .committed
                    .insert((self.config.group_id.clone(), slot.0.clone(), slot.1), pos + 1);
                self.positions.insert(slot.clone(), pos + 1);
                self.eof_sent.remove(&slot);
                self.cursor = (idx + 1) % n;
                return Some(QueueEvent::Message(message));
            }

            if self.config.partition_eof && !self.eof_sent.contains(slot) {
                let slot = slot.clone();
                self.eof_sent.insert(slot.clone());
                self.cursor = (idx + 1) % n;
                return Some(QueueEvent::PartitionEnd { topic: slot.0, partition: slot.1, offset: pos });
            }
        }
        None
    }
}

impl QueueConsumer for MemoryConsumer {
    fn subscribe(&mut self, topic: &str) -> Result<(), RelayError> {
        let state = self.broker.shared.lock();
        let log = state
            .topics
            .get(topic)
            .ok_or_else(|| QueueError::UnknownTopic(topic.to_string()))?;

        for (p, part) in log.partitions.iter().enumerate() {
            let slot = (topic.to_string(), p as u32);
            let committed = state
                .committed
                .get(&(self.config.group_id.clone(), topic.to_string(), p as u32))
                .copied();
            let start = committed.unwrap_or(match self.config.auto_offset_reset {
                OffsetReset::Earliest => part.start,
                OffsetReset::Latest => part.end(),
            });
            self.positions.insert(slot.clone(), start);
            if !self.slots.contains(&slot) {
                self.slots.push(slot);
            }
        }
        tracing::debug!(
            topic = %topic,
            group = %self.config.group_id,
            partitions = log.partitions.len(),
            "consumer subscribed"
        );
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Pin<Box<dyn Future<Output = Option<QueueEvent>> + Send + '_>> {
        Box::pin(async move {
            if self.closed {
                return Some(QueueEvent::Error(QueueError::Closed.into()));
            }
            let shared = self.broker.shared.clone();
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let appended = shared.appended.notified();
                tokio::pin!(appended);
                appended.as_mut().enable();

                if let Some(event) = self.next_ready() {
                    return Some(event);
                }
                if tokio::time::timeout_at(deadline, appended).await.is_err() {
                    return None;
                }
            }
        })
    }

    fn close(&mut self) {
        self.closed = true;
        self.slots.clear();
    }
}
