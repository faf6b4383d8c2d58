use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use relay_api::{codec, ErrorKind, RecordService, RelayError};

use crate::RpcError;

pub const POST_DATA_PATH: &str = "/rpc/PostData";

#[derive(Clone)]
struct AppState {
    service: Arc<dyn RecordService>,
}

/// Маршруты RPC-сервера поверх произвольного `RecordService`.
pub fn router(service: Arc<dyn RecordService>) -> Router {
    Router::new()
        .route(POST_DATA_PATH, post(handle_post_data))
        .route("/health", get(handle_health))
        .with_state(AppState { service })
}

pub async fn bind(addr: &str) -> Result<TcpListener, RpcError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| RpcError::Bind { addr: addr.to_string(), source })
}

/// Обслуживать запросы до отмены `shutdown`; начатые запросы
/// дорабатывают до конца.
pub async fn serve(
    listener: TcpListener,
    service: Arc<dyn RecordService>,
    shutdown: CancellationToken,
) -> Result<(), RpcError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "rpc server listening");
    }
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(RpcError::Serve)?;
    tracing::info!("rpc server stopped");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  POST /rpc/PostData
// ═══════════════════════════════════════════════════════════════

async fn handle_post_data(State(state): State<AppState>, body: Bytes) -> Response {
    let record = match codec::decode(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(bytes = body.len(), error = %e, "PostData: undecodable body");
            return error_response(StatusCode::BAD_REQUEST, &e);
        }
    };

    match state.service.post_data(record).await {
        Ok(ack) => axum::Json(ack).into_response(),
        Err(e) => {
            let status = match e.kind() {
                ErrorKind::Format => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, &e)
        }
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, e: &RelayError) -> Response {
    (status, axum::Json(serde_json::json!({ "error": e.message() }))).into_response()
}
