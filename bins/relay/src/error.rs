use relay_api::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("{0}")]
    Rpc(#[from] relay_rpc::RpcError),

    #[error("{0}")]
    Relay(RelayError),

    #[error("queue transport failed: {0}")]
    Transport(RelayError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    pub(crate) fn config(context: &'static str, detail: impl Into<String>) -> Self {
        AppError::Config { context, detail: detail.into() }
    }

    /// Config-ошибка коллаборатора (broker, writer) становится
    /// `AppError::Config`: процесс не стартует вместо отказа на первой записи.
    pub(crate) fn relay(context: &'static str, e: RelayError) -> Self {
        if e.is_config() {
            AppError::config(context, e.message())
        } else {
            AppError::Relay(e)
        }
    }
}

impl From<queue_engine::QueueError> for AppError {
    fn from(e: queue_engine::QueueError) -> Self {
        AppError::relay("queue", e.into_relay_error())
    }
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        AppError::relay("startup", e)
    }
}
