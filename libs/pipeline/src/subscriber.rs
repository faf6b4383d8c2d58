use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use relay_api::{codec, QueueConsumer, QueueEvent, QueueMessage, RecordService, RelayError};

use crate::config::SubscriberConfig;
use crate::diagnostics::Diagnostics;
use crate::PipelineError;

/// Почему `Subscriber::run` завершился.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    TransportError(RelayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberSummary {
    pub received: usize,
    pub relayed: usize,
    pub decode_failed: usize,
    pub rpc_failed: usize,
    pub partition_ends: usize,
    pub stop: StopReason,
}

impl SubscriberSummary {
    fn new() -> Self {
        Self {
            received: 0,
            relayed: 0,
            decode_failed: 0,
            rpc_failed: 0,
            partition_ends: 0,
            stop: StopReason::Cancelled,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

/// Queue → decode → provenance hop → RPC `PostData`.
///
/// Один poll, одно декодирование, один RPC-вызов — строго
/// последовательно, так что порядок внутри партиции сохраняется.
/// Сообщение считается потреблённым до RPC: при ошибке RPC оно
/// логируется и не повторяется.
pub struct Subscriber {
    consumer: Box<dyn QueueConsumer>,
    service: Arc<dyn RecordService>,
    config: SubscriberConfig,
    host: String,
    diag: Diagnostics,
}

impl Subscriber {
    pub fn new(
        consumer: Box<dyn QueueConsumer>,
        service: Arc<dyn RecordService>,
        config: SubscriberConfig,
        host: String,
        diag: Diagnostics,
    ) -> Self {
        Self { consumer, service, config, host, diag }
    }

    /// Крутить poll-цикл до ошибки транспорта или отмены `token`.
    pub async fn run(&mut self, token: CancellationToken) -> Result<SubscriberSummary, PipelineError> {
        self.consumer
            .subscribe(&self.config.topic)
            .map_err(|source| PipelineError::Queue { context: "subscribe", source })?;
        tracing::info!(parent: self.diag.span(), topic = %self.config.topic, "subscriber started");

        let timeout = self.config.poll_timeout();
        let mut summary = SubscriberSummary::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    summary.stop = StopReason::Cancelled;
                    break;
                }
                event = self.consumer.poll(timeout) => event,
            };

            match event {
                None => continue,
                Some(QueueEvent::Message(message)) => {
                    summary.received += 1;
                    self.relay(message, &mut summary).await;
                }
                Some(QueueEvent::PartitionEnd { topic, partition, offset }) => {
                    summary.partition_ends += 1;
                    if self.diag.at_least(2) {
                        tracing::info!(parent: self.diag.span(), %topic, partition, offset, "reached end of partition");
                    }
                }
                Some(QueueEvent::Error(e)) => {
                    tracing::error!(parent: self.diag.span(), error = %e, "queue transport error, stopping");
                    summary.stop = StopReason::TransportError(e);
                    break;
                }
            }
        }

        self.consumer.close();
        tracing::info!(
            parent: self.diag.span(),
            received = summary.received,
            relayed = summary.relayed,
            decode_failed = summary.decode_failed,
            rpc_failed = summary.rpc_failed,
            stop = ?summary.stop,
            "subscriber stopped"
        );
        Ok(summary)
    }

    /// `&mut self`: `Subscriber` держит `Box<dyn QueueConsumer>` (только
    /// `Send`), а future `run` должен оставаться `Send` для `tokio::spawn`.
    async fn relay(&mut self, message: QueueMessage, summary: &mut SubscriberSummary) {
        if self.diag.at_least(3) {
            tracing::info!(
                parent: self.diag.span(),
                partition = message.partition,
                offset = message.offset,
                bytes = message.payload.len(),
                payload = ?message.payload,
                "raw message"
            );
        }

        let mut record = match codec::decode(&message.payload).map_err(PipelineError::Codec) {
            Ok(record) => record,
            Err(e) => {
                summary.decode_failed += 1;
                tracing::warn!(
                    parent: self.diag.span(),
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "cannot decode payload, skipping"
                );
                return;
            }
        };
        record.stamp(&self.config.stage, &self.host);

        if self.diag.at_least(4) {
            tracing::info!(parent: self.diag.span(), record = ?record, "relaying");
        } else if self.diag.at_least(2) {
            tracing::info!(
                parent: self.diag.span(),
                partition = message.partition,
                seq = record.field("seq").unwrap_or_default(),
                id = %record.id,
                "relaying"
            );
        }

        let id = record.id.clone();
        match self.service.post_data(record).await {
            Ok(ack) => {
                summary.relayed += 1;
                if self.diag.at_least(1) {
                    tracing::info!(parent: self.diag.span(), id = %ack.id, note = %ack.note, "acknowledged");
                }
            }
            Err(e) => {
                summary.rpc_failed += 1;
                tracing::error!(parent: self.diag.span(), %id, error = %e, "PostData failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    use relay_api::{Acknowledgement, Field, Record};

    use super::*;

    /// Consumer, отдающий заранее заданную последовательность событий.
    struct ScriptedConsumer {
        events: VecDeque<QueueEvent>,
        subscribed: Option<String>,
        closed: Arc<Mutex<bool>>,
    }

    impl QueueConsumer for ScriptedConsumer {
        fn subscribe(&mut self, topic: &str) -> Result<(), RelayError> {
            self.subscribed = Some(topic.to_string());
            Ok(())
        }

        fn poll(&mut self, _timeout: Duration) -> Pin<Box<dyn Future<Output = Option<QueueEvent>> + Send + '_>> {
            Box::pin(async move {
                match self.events.pop_front() {
                    Some(ev) => Some(ev),
                    None => {
                        tokio::task::yield_now().await;
                        None
                    }
                }
            })
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    /// RPC-сервис, записывающий всё, что получил.
    #[derive(Default)]
    struct RecordingService {
        received: Mutex<Vec<Record>>,
        fail_seq: Option<&'static str>,
    }

    impl RecordService for RecordingService {
        fn post_data(
            &self,
            record: Record,
        ) -> Pin<Box<dyn Future<Output = Result<Acknowledgement, RelayError>> + Send + '_>> {
            Box::pin(async move {
                if self.fail_seq.is_some() && record.field("seq") == self.fail_seq {
                    return Err(RelayError::io("connection refused"));
                }
                let ack = Acknowledgement::processed(&record);
                self.received.lock().unwrap().push(record);
                Ok(ack)
            })
        }
    }

    fn message(seq: &str, offset: u64) -> QueueEvent {
        let mut record = Record::new("postgres", vec![Field::new("seq", seq)]);
        record.stamp("publish", "pub-host");
        QueueEvent::Message(QueueMessage {
            topic: "persons".into(),
            partition: 0,
            offset,
            key: b"CA".to_vec(),
            payload: codec::encode(&record).unwrap(),
        })
    }

    fn subscriber(events: Vec<QueueEvent>, service: Arc<RecordingService>) -> (Subscriber, Arc<Mutex<bool>>) {
        let closed = Arc::new(Mutex::new(false));
        let consumer = ScriptedConsumer { events: events.into(), subscribed: None, closed: closed.clone() };
        let sub = Subscriber::new(
            Box::new(consumer),
            service,
            SubscriberConfig::new("persons"),
            "relay-host".into(),
            Diagnostics::silent(),
        );
        (sub, closed)
    }

    fn seqs(service: &RecordingService) -> Vec<String> {
        service
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.field("seq").unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn relays_in_order_and_stops_at_transport_error() {
        let service = Arc::new(RecordingService::default());
        let events = vec![
            message("A", 0),
            message("B", 1),
            QueueEvent::PartitionEnd { topic: "persons".into(), partition: 0, offset: 2 },
            message("C", 2),
            QueueEvent::Error(RelayError::io("broker down")),
            message("D", 3),
        ];
        let (mut sub, closed) = subscriber(events, service.clone());

        let summary = sub.run(CancellationToken::new()).await.unwrap();

        assert_eq!(seqs(&service), vec!["A", "B", "C"]);
        assert_eq!(summary.received, 3);
        assert_eq!(summary.relayed, 3);
        assert_eq!(summary.partition_ends, 1);
        assert_eq!(summary.stop, StopReason::TransportError(RelayError::io("broker down")));
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn relay_hop_is_appended() {
        let service = Arc::new(RecordingService::default());
        let events = vec![message("A", 0), QueueEvent::Error(RelayError::io("eof"))];
        let (mut sub, _) = subscriber(events, service.clone());
        sub.run(CancellationToken::new()).await.unwrap();

        let received = service.received.lock().unwrap();
        let hops = received[0].provenance.hops();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].stage, "publish");
        assert_eq!(hops[1].stage, "relay");
        assert_eq!(hops[1].host, "relay-host");
    }

    #[tokio::test]
    async fn undecodable_payload_and_rpc_failure_do_not_stop_the_loop() {
        let service = Arc::new(RecordingService { fail_seq: Some("B"), ..Default::default() });
        let garbage = QueueEvent::Message(QueueMessage {
            topic: "persons".into(),
            partition: 0,
            offset: 0,
            key: vec![],
            payload: b"not a record".to_vec(),
        });
        let events = vec![
            garbage,
            message("A", 1),
            message("B", 2),
            message("C", 3),
            QueueEvent::Error(RelayError::io("eof")),
        ];
        let (mut sub, _) = subscriber(events, service.clone());
        let summary = sub.run(CancellationToken::new()).await.unwrap();

        assert_eq!(seqs(&service), vec!["A", "C"]);
        assert_eq!(summary.decode_failed, 1);
        assert_eq!(summary.rpc_failed, 1);
        assert_eq!(summary.relayed, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_an_idle_loop() {
        let service = Arc::new(RecordingService::default());
        let (mut sub, closed) = subscriber(vec![message("A", 0)], service.clone());
        let token = CancellationToken::new();

        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });
        let summary = sub.run(token).await.unwrap();

        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(seqs(&service), vec!["A"]);
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_can_be_spawned_on_the_runtime() {
        let service = Arc::new(RecordingService::default());
        let (mut sub, closed) = subscriber(vec![message("A", 0), message("B", 1)], service.clone());
        let token = CancellationToken::new();

        let task = tokio::spawn({
            let token = token.clone();
            async move { sub.run(token).await }
        });
        while seqs(&service).len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        let summary = task.await.unwrap().unwrap();

        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(summary.relayed, 2);
        assert_eq!(seqs(&service), vec!["A", "B"]);
        assert!(*closed.lock().unwrap());
    }
}
