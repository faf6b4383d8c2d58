use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pipeline::{Diagnostics, StopReason, Subscriber, SubscriberSummary};
use relay_api::{QueueConsumer, RecordService};
use relay_rpc::RpcClient;

use crate::config::RelayConfig;
use crate::error::AppError;

pub async fn run(cfg: &RelayConfig) -> Result<(), AppError> {
    let consumer = super::shared_consumer(cfg)?;
    let client = RpcClient::new(&cfg.rpc_client_config())?;
    tracing::info!(rpc = %client.url(), group = %cfg.queue.group, "subscribing");

    let token = CancellationToken::new();
    super::cancel_on_ctrl_c(token.clone());

    let mut subscriber = subscriber(cfg, consumer, Arc::new(client));
    exit_status(subscriber.run(token).await?)
}

pub(crate) fn subscriber(
    cfg: &RelayConfig,
    consumer: Box<dyn QueueConsumer>,
    service: Arc<dyn RecordService>,
) -> Subscriber {
    Subscriber::new(
        consumer,
        service,
        cfg.subscriber_config(),
        cfg.host(),
        Diagnostics::new("relay", cfg.verbosity()),
    )
}

/// Остановка из-за ошибки транспорта — ненулевой код выхода.
pub(crate) fn exit_status(summary: SubscriberSummary) -> Result<(), AppError> {
    match summary.stop {
        StopReason::Cancelled => Ok(()),
        StopReason::TransportError(e) => Err(AppError::Transport(e)),
    }
}
