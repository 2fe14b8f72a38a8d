//! Administrative HTTP surface.
//!
//! Mutating routes only persist the desired state; `POST /restart` applies it.
//! `GET /logs` upgrades to a WebSocket that streams one JSON [`LogRecord`]
//! per text frame.
//!
//! [`LogRecord`]: syncherd_monitor::LogRecord

use crate::error::ServiceError;
use crate::service::Orchestrator;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use syncherd_types::{DesiredState, SyncSpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
struct AppState {
    service: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

/// Builds the admin router. `shutdown` closes open log streams and cancels
/// in-flight restarts.
pub fn build_router(service: Arc<Orchestrator>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/config", get(get_config).post(update_config))
        .route("/syncs", get(list_syncs).post(create_sync))
        .route(
            "/syncs/{name}",
            get(get_sync).put(update_sync).delete(delete_sync),
        )
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/restart", post(restart))
        .route("/logs", get(logs))
        .with_state(AppState { service, shutdown })
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::SyncNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::SyncExists(_) => StatusCode::CONFLICT,
            ServiceError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(component = "http", error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

type ApiResult<T> = Result<T, ServiceError>;

// ── Configuration ───────────────────────────────────────────────

async fn get_config(State(state): State<AppState>) -> ApiResult<Json<DesiredState>> {
    Ok(Json(state.service.get_config().await?))
}

async fn update_config(
    State(state): State<AppState>,
    Json(desired): Json<DesiredState>,
) -> ApiResult<&'static str> {
    state.service.update_config(desired).await?;
    Ok("Config updated")
}

// ── Syncs ───────────────────────────────────────────────────────

async fn list_syncs(State(state): State<AppState>) -> ApiResult<Json<Vec<SyncSpec>>> {
    Ok(Json(state.service.list_syncs().await?))
}

async fn create_sync(
    State(state): State<AppState>,
    Json(sync): Json<SyncSpec>,
) -> ApiResult<(StatusCode, &'static str)> {
    state.service.add_sync(sync).await?;
    Ok((StatusCode::CREATED, "Sync created"))
}

async fn get_sync(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<SyncSpec>> {
    Ok(Json(state.service.get_sync(&name).await?))
}

async fn update_sync(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(sync): Json<SyncSpec>,
) -> ApiResult<&'static str> {
    state.service.update_sync(&name, sync).await?;
    Ok("Sync updated")
}

async fn delete_sync(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<&'static str> {
    state.service.delete_sync(&name).await?;
    Ok("Sync deleted")
}

// ── Engine lifecycle ────────────────────────────────────────────

async fn start(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.service.start_engine().await?;
    Ok("Engine started")
}

async fn stop(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.service.stop_engine().await?;
    Ok("Engine stopped")
}

async fn restart(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.service.reload_and_restart(&state.shutdown).await?;
    Ok("Configuration reloaded and engine restarted")
}

// ── Log stream ──────────────────────────────────────────────────

async fn logs(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_logs(socket, state))
}

async fn stream_logs(mut socket: WebSocket, state: AppState) {
    let mut subscription = state.service.hub().subscribe();
    debug!(component = "http", subscriber = subscription.id(), "Log stream opened");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            record = subscription.recv() => {
                let Some(record) = record else { break };
                let text = match serde_json::to_string(&record) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(component = "http", error = %e, "Failed to encode log record");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    debug!(component = "http", subscriber = subscription.id(), "Log stream closed");
}
