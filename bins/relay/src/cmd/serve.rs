use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::AppError;

pub async fn run(cfg: &RelayConfig) -> Result<(), AppError> {
    let router = super::build_router(cfg)?;
    let listener = relay_rpc::bind(&cfg.rpc.listen).await?;

    let token = CancellationToken::new();
    super::cancel_on_ctrl_c(token.clone());

    relay_rpc::serve(listener, Arc::new(router), token).await?;
    tracing::info!("shutdown complete");
    Ok(())
}
