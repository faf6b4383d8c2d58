use std::path::Path;
use std::sync::Arc;

use pipeline::{read_lines, Diagnostics, LineSchema, PublishSummary, Publisher};
use relay_api::QueueProducer;

use crate::config::RelayConfig;
use crate::error::AppError;

pub async fn run(cfg: &RelayConfig) -> Result<(), AppError> {
    let producer = super::shared_producer(cfg).await?;
    execute(cfg, producer).await?;
    Ok(())
}

/// Опубликовать `source.file` через `producer` и дождаться shutdown handshake.
pub(crate) async fn execute(cfg: &RelayConfig, producer: Arc<dyn QueueProducer>) -> Result<PublishSummary, AppError> {
    let file = cfg.source_file()?;
    let schema = LineSchema::new(&cfg.source.schema)?;
    let publisher = Publisher::new(
        producer,
        schema,
        cfg.publisher_config()?,
        cfg.host(),
        Diagnostics::new("publish", cfg.verbosity()),
    );
    tracing::info!(
        file,
        destination = %publisher.destination(),
        topic = %cfg.queue.topic,
        "publishing"
    );

    let summary = publisher.run(read_lines(Path::new(file))?).await?;
    tracing::info!(
        lines = summary.lines,
        published = summary.published,
        delivered = summary.delivered,
        malformed = summary.malformed,
        failed = summary.publish_failed + summary.delivery_failed,
        undelivered = summary.undelivered,
        "publish finished"
    );
    Ok(summary)
}
