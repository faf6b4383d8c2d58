use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::{
    codec, DeliveryEvent, DeliveryOutcome, DeliveryStream, Destination, ProducerEvent, QueueProducer,
    Record,
};

use crate::config::{PublishErrorPolicy, PublisherConfig};
use crate::diagnostics::Diagnostics;
use crate::source::LineSchema;
use crate::PipelineError;

/// Итог одного прогона publisher'а.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Строк данных (без заголовка), взятых в обработку.
    pub lines: usize,
    pub published: usize,
    pub malformed: usize,
    pub publish_failed: usize,
    pub delivered: usize,
    pub delivery_failed: usize,
    /// Не доставлено к истечению flush timeout.
    pub undelivered: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct DeliveryStats {
    delivered: usize,
    failed: usize,
}

// ═══════════════════════════════════════════════════════════════
//  Publisher
// ═══════════════════════════════════════════════════════════════

/// Файл → Record → codec → Queue Client.
///
/// Параллельно publish-циклу работает confirmation-задача, которая
/// разбирает delivery events. Завершение всегда идёт в порядке
/// flush → сигнал завершения → ожидание confirmation-задачи → close.
pub struct Publisher {
    producer: Arc<dyn QueueProducer>,
    schema: LineSchema,
    config: PublisherConfig,
    destination: Destination,
    host: String,
    diag: Diagnostics,
}

impl Publisher {
    pub fn new(
        producer: Arc<dyn QueueProducer>,
        schema: LineSchema,
        config: PublisherConfig,
        host: String,
        diag: Diagnostics,
    ) -> Self {
        let destination = Destination::from_selection(&config.destination);
        if !destination.is_known() {
            tracing::warn!(parent: diag.span(), destination = %destination, "publishing with unrecognized destination");
        }
        Self { producer, schema, config, destination, host, diag }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Опубликовать все строки источника и дождаться исхода каждой.
    ///
    /// Ошибка чтения источника и (при `on_publish_error = abort`) ошибка
    /// publish прерывают цикл, но handshake выполняется в любом случае.
    pub async fn run<I>(&self, lines: I) -> Result<PublishSummary, PipelineError>
    where
        I: IntoIterator<Item = std::io::Result<String>>,
    {
        let stream = self
            .producer
            .deliveries()
            .map_err(|source| PipelineError::Queue { context: "delivery stream", source })?;

        let term = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let confirm = tokio::spawn(confirm_deliveries(stream, term.clone(), done_tx, self.diag.clone()));

        let mut summary = PublishSummary::default();
        let outcome = self.publish_lines(lines, &mut summary);

        let stats = self.shutdown(confirm, term, done_rx, &mut summary).await;
        summary.delivered = stats.delivered;
        summary.delivery_failed = stats.failed;

        tracing::info!(
            parent: self.diag.span(),
            lines = summary.lines,
            published = summary.published,
            malformed = summary.malformed,
            publish_failed = summary.publish_failed,
            delivered = summary.delivered,
            delivery_failed = summary.delivery_failed,
            undelivered = summary.undelivered,
            "publish finished"
        );

        outcome.map(|()| summary)
    }

    fn publish_lines<I>(&self, lines: I, summary: &mut PublishSummary) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = std::io::Result<String>>,
    {
        let limit = self.config.effective_limit();

        for (idx, line) in lines.into_iter().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|source| PipelineError::Source { path: format!("line {line_no}"), source })?;
            if idx == 0 && self.schema.skip_header() {
                continue;
            }
            if limit.is_some_and(|n| summary.lines >= n) {
                tracing::debug!(parent: self.diag.span(), limit = ?limit, "line limit reached");
                break;
            }
            summary.lines += 1;

            let fields = match self.schema.parse(line_no, &line) {
                Ok(fields) => fields,
                Err(e) => {
                    summary.malformed += 1;
                    tracing::warn!(parent: self.diag.span(), error = %e, "skipping line");
                    continue;
                }
            };
            let key = self.schema.key(&fields).to_string();

            let mut record = Record::new(self.destination.tag(), fields);
            record.stamp(&self.config.stage, &self.host);

            let payload = match codec::encode(&record).map_err(PipelineError::Codec) {
                Ok(p) => p,
                Err(e) => {
                    summary.malformed += 1;
                    tracing::warn!(parent: self.diag.span(), line = line_no, error = %e, "cannot encode record");
                    continue;
                }
            };

            match self.producer.publish(&self.config.topic, key.as_bytes(), payload) {
                Ok(()) => summary.published += 1,
                Err(e) => {
                    summary.publish_failed += 1;
                    match self.config.on_publish_error {
                        PublishErrorPolicy::Skip => {
                            tracing::warn!(parent: self.diag.span(), line = line_no, id = %record.id, error = %e, "publish failed, skipping");
                        }
                        PublishErrorPolicy::Abort => {
                            tracing::error!(parent: self.diag.span(), line = line_no, id = %record.id, error = %e, "publish failed, aborting");
                            return Err(PipelineError::Publish(e));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn shutdown(
        &self,
        confirm: JoinHandle<()>,
        term: CancellationToken,
        done: oneshot::Receiver<DeliveryStats>,
        summary: &mut PublishSummary,
    ) -> DeliveryStats {
        summary.undelivered = self.producer.flush(self.config.flush_timeout()).await;
        if summary.undelivered > 0 {
            tracing::warn!(
                parent: self.diag.span(),
                undelivered = summary.undelivered,
                timeout_ms = self.config.flush_timeout_ms,
                "flush timed out with outstanding messages"
            );
        }

        term.cancel();
        let stats = match done.await {
            Ok(stats) => stats,
            Err(_) => {
                tracing::error!(parent: self.diag.span(), "confirmation task ended without reporting");
                DeliveryStats::default()
            }
        };
        if let Err(e) = confirm.await {
            tracing::error!(parent: self.diag.span(), error = %e, "confirmation task failed");
        }

        self.producer.close();
        stats
    }
}

// ═══════════════════════════════════════════════════════════════
//  Confirmation task
// ═══════════════════════════════════════════════════════════════

async fn confirm_deliveries(
    mut stream: Box<dyn DeliveryStream>,
    term: CancellationToken,
    done: oneshot::Sender<DeliveryStats>,
    diag: Diagnostics,
) {
    let mut stats = DeliveryStats::default();
    loop {
        tokio::select! {
            biased;
            event = stream.recv() => match event {
                Some(event) => observe(event, &mut stats, &diag),
                None => break,
            },
            _ = term.cancelled() => {
                // Всё, что уже пришло до сигнала, должно быть учтено.
                while let Some(event) = stream.try_recv() {
                    observe(event, &mut stats, &diag);
                }
                break;
            }
        }
    }
    let _ = done.send(stats);
}

fn observe(event: ProducerEvent, stats: &mut DeliveryStats, diag: &Diagnostics) {
    match event {
        ProducerEvent::Delivery(delivery) => match &delivery.outcome {
            DeliveryOutcome::Delivered { .. } => {
                stats.delivered += 1;
                report_delivered(&delivery, diag);
            }
            DeliveryOutcome::Failed(e) => {
                stats.failed += 1;
                if diag.at_least(3) {
                    tracing::warn!(
                        parent: diag.span(),
                        topic = %delivery.topic,
                        bytes = delivery.payload.len(),
                        error = %e,
                        "failed to deliver message"
                    );
                }
            }
        },
        ProducerEvent::Error(e) => {
            tracing::error!(parent: diag.span(), error = %e, "queue client error");
        }
    }
}

/// Одна из пяти форм подтверждения, по уровню verbosity.
fn report_delivered(delivery: &DeliveryEvent, diag: &Diagnostics) {
    if diag.verbosity() == 0 {
        return;
    }
    let record = codec::decode(&delivery.payload).ok();
    let field = |name: &str| record.as_ref().and_then(|r| r.field(name)).unwrap_or_default().to_string();
    let span = diag.span();

    match diag.verbosity() {
        1 => tracing::info!(parent: span, seq = %field("seq"), first = %field("first"), last = %field("last"), "delivered"),
        2 => tracing::info!(
            parent: span,
            seq = %field("seq"),
            id = %record.as_ref().map(|r| r.id.as_str()).unwrap_or_default(),
            first = %field("first"),
            last = %field("last"),
            "delivered"
        ),
        3 => tracing::info!(
            parent: span,
            seq = %field("seq"),
            first = %field("first"),
            last = %field("last"),
            payload = ?delivery.payload,
            "delivered"
        ),
        _ => {
            if let DeliveryOutcome::Delivered { partition, offset } = delivery.outcome {
                tracing::info!(
                    parent: span,
                    topic = %delivery.topic,
                    partition,
                    offset,
                    record = ?record,
                    "message delivered"
                );
            }
        }
    }
}
