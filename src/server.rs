use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::poller::PollerHandle;
use crate::status::{Status, StatusSnapshot};

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub status: Status,
    pub poller: PollerHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/trigger_once", post(trigger_once))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("🌐 Status server listening on http://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Liveness only, independent of the poller's health
async fn health() -> &'static str {
    "OK"
}

async fn index(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.status.snapshot();
    Json(json!({
        "status": "ok",
        "worker_running": snapshot.running,
        "processed_count": snapshot.processed_count,
    }))
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

async fn trigger_once(State(state): State<AppState>) -> Response {
    match state.poller.trigger_once().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!("On-demand cycle failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
