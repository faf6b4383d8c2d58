use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};

use relay_api::{
    DeliveryEvent, DeliveryOutcome, DeliveryStream, ProducerEvent, QueueProducer, RelayError,
};

use crate::broker::MemoryBroker;
use crate::error::QueueError;

fn default_linger() -> Duration {
    Duration::from_millis(5)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Сколько delivery-задача копит batch перед записью в лог.
    #[serde(default = "default_linger")]
    pub linger: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self { linger: default_linger() }
    }
}

struct Pending {
    topic: String,
    key: Vec<u8>,
    payload: Vec<u8>,
}

/// Счётчик in-flight сообщений + уведомление «очередь пуста» для flush.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    drained: Notify,
}

impl InFlight {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MpscDeliveryStream
// ═══════════════════════════════════════════════════════════════

pub struct MpscDeliveryStream {
    rx: mpsc::UnboundedReceiver<ProducerEvent>,
}

impl MpscDeliveryStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ProducerEvent>) -> Self {
        Self { rx }
    }
}

impl DeliveryStream for MpscDeliveryStream {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ProducerEvent>> + Send + '_>> {
        Box::pin(async { self.rx.recv().await })
    }

    fn try_recv(&mut self) -> Option<ProducerEvent> {
        self.rx.try_recv().ok()
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryProducer
// ═══════════════════════════════════════════════════════════════

/// Producer поверх `MemoryBroker`.
///
/// `publish` только кладёт сообщение в канал; фоновая задача пишет
/// batch'и в лог партиций и выдаёт по одному `DeliveryEvent` на
/// каждое сообщение.
pub struct MemoryProducer {
    tx: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ProducerEvent>>>,
    in_flight: Arc<InFlight>,
    closed: AtomicBool,
}

impl MemoryProducer {
    pub(crate) fn new(broker: MemoryBroker, config: ProducerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(InFlight::default());

        tokio::spawn(delivery_loop(broker, config, rx, events_tx, in_flight.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            events: Mutex::new(Some(events_rx)),
            in_flight,
            closed: AtomicBool::new(false),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }
}

async fn delivery_loop(
    broker: MemoryBroker,
    config: ProducerConfig,
    mut rx: mpsc::UnboundedReceiver<Pending>,
    events: mpsc::UnboundedSender<ProducerEvent>,
    in_flight: Arc<InFlight>,
) {
    while let Some(first) = rx.recv().await {
        if !config.linger.is_zero() {
            tokio::time::sleep(config.linger).await;
        }
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        tracing::trace!(messages = batch.len(), "delivering batch");
        for msg in batch {
            let outcome = match broker.append(&msg.topic, &msg.key, msg.payload.clone()) {
                Ok((partition, offset)) => DeliveryOutcome::Delivered { partition, offset },
                Err(e) => DeliveryOutcome::Failed(e.into_relay_error()),
            };
            // Получатель мог уже уйти; событие тогда просто теряется.
            let _ = events.send(ProducerEvent::Delivery(DeliveryEvent {
                topic: msg.topic,
                key: msg.key,
                payload: msg.payload,
                outcome,
            }));
            in_flight.done();
        }
    }
    tracing::debug!("delivery task stopped");
}

impl QueueProducer for MemoryProducer {
    fn publish(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> Result<(), RelayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed.into());
        }
        let guard = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        let tx = guard.as_ref().ok_or(QueueError::Closed)?;

        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let pending = Pending { topic: topic.to_string(), key: key.to_vec(), payload };
        if tx.send(pending).is_err() {
            self.in_flight.done();
            return Err(QueueError::Closed.into());
        }
        Ok(())
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
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let drained = self.in_flight.drained.notified();
                tokio::pin!(drained);
                drained.as_mut().enable();

                let pending = self.in_flight();
                if pending == 0 {
                    return 0;
                }
                if tokio::time::timeout_at(deadline, drained).await.is_err() {
                    return self.in_flight();
                }
            }
        })
    }

    /// Sender закрывается, delivery-задача дописывает то, что уже
    /// в канале, и завершается; поток событий после этого закрывается.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}
