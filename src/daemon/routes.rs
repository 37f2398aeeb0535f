//! HTTP and websocket adapter over the workload registry.
//!
//! Authorization is enforced by whatever fronts the daemon; every request
//! that reaches these handlers is trusted.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::console::{dispatch, parse_frame, stat_frame, InboundFrame, OutboundFrame};
use crate::environment::ServerStats;
use crate::error::Error;
use crate::workload::{Variable, Workload, WorkloadDefinition, WorkloadRegistry};

/// Console output is flushed to socket clients at this cadence
const CONSOLE_FLUSH_INTERVAL: Duration = Duration::from_millis(50);
/// Console chunks held for one socket before a flush is forced
const MAX_PENDING_LOGS: usize = 256;
/// Replies queued for the socket writer
const REPLY_QUEUE: usize = 32;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<WorkloadRegistry>,
}

/// Error body: `{"error": {"code": ..., "message": ...}}`
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_)
            | Error::AlreadyRunning
            | Error::InstallInProgress(_)
            | Error::ImageDownloading(_) => StatusCode::CONFLICT,
            Error::NotRunning | Error::ServerOffline => StatusCode::CONFLICT,
            Error::InvalidId(_)
            | Error::UndefinedEnvironment(_)
            | Error::UnknownStepKind(_)
            | Error::InvalidStep { .. }
            | Error::PathOutsideRoot(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("Request failed: {}", self.0);
        }
        let body = json!({
            "error": {"code": self.0.code(), "message": self.0.to_string()}
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route(
            "/server/{id}",
            get(get_server)
                .post(edit_server)
                .put(create_server)
                .delete(delete_server),
        )
        .route("/server/{id}/start", post(start_server))
        .route("/server/{id}/stop", post(stop_server))
        .route("/server/{id}/kill", post(kill_server))
        .route("/server/{id}/install", post(install_server))
        .route("/server/{id}/reload", post(reload_server))
        .route("/server/{id}/logs", get(server_logs))
        .route("/server/{id}/stats", get(server_stats))
        .route("/server/{id}/status", get(server_status))
        .route("/server/{id}/console", post(server_console))
        .route("/server/{id}/socket", get(server_socket))
        .with_state(state)
}

async fn liveness() -> Json<Value> {
    Json(json!({"message": "paddock is running"}))
}

async fn create_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(definition): Json<WorkloadDefinition>,
) -> ApiResult<StatusCode> {
    state.registry.create(&id, definition).await?;
    Ok(StatusCode::CREATED)
}

async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct ServerView {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    display: String,
    environment: String,
    data: BTreeMap<String, Variable>,
}

async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerView>> {
    let workload = state.registry.get(&id).await?;
    let definition = workload.definition();
    Ok(Json(ServerView {
        id,
        environment: definition.environment_kind().to_string(),
        kind: definition.kind,
        display: definition.display,
        data: definition.data,
    }))
}

#[derive(Deserialize)]
struct EditRequest {
    data: Map<String, Value>,
}

async fn edit_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EditRequest>,
) -> ApiResult<StatusCode> {
    state.registry.edit(&id, request.data).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.get(&id).await?.start().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.get(&id).await?.stop().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn kill_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.get(&id).await?.kill().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn install_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.get(&id).await?.spawn_install()?;
    Ok(StatusCode::ACCEPTED)
}

async fn reload_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.reload(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default)]
    time: i64,
}

async fn server_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Value>> {
    let workload = state.registry.get(&id).await?;
    let (logs, epoch) = workload.environment().console().read_text_from(query.time);
    Ok(Json(json!({"epoch": epoch, "logs": logs})))
}

async fn server_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerStats>> {
    let workload = state.registry.get(&id).await?;
    if !workload.is_running().await? {
        return Err(Error::ServerOffline.into());
    }
    Ok(Json(workload.environment().get_stats().await?))
}

async fn server_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let workload = state.registry.get(&id).await?;
    Ok(Json(json!({
        "running": workload.is_running().await?,
        "installing": workload.is_installing(),
    })))
}

async fn server_console(
    State(state): State<AppState>,
    Path(id): Path<String>,
    command: String,
) -> ApiResult<StatusCode> {
    let workload = state.registry.get(&id).await?;
    if !workload.is_running().await? {
        return Err(Error::NotRunning.into());
    }
    workload
        .environment()
        .execute_in_main_process(command.trim_end())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn server_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let workload = state.registry.get(&id).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, workload, state.registry)))
}

async fn handle_socket(socket: WebSocket, workload: Arc<Workload>, registry: Arc<WorkloadRegistry>) {
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<OutboundFrame>(REPLY_QUEUE);
    let mut subscription = workload.environment().console().subscribe();
    debug!(workload = %workload.id(), "Console socket opened");

    let writer = tokio::spawn(async move {
        let mut flush = tokio::time::interval(CONSOLE_FLUSH_INTERVAL);
        let mut pending: Vec<String> = Vec::new();
        loop {
            tokio::select! {
                entry = subscription.recv() => match entry {
                    Some(entry) => {
                        pending.push(entry.text.clone());
                        if pending.len() >= MAX_PENDING_LOGS {
                            let frame = OutboundFrame::Console {
                                logs: std::mem::take(&mut pending),
                            };
                            if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        // detached by the buffer for falling behind
                        let frame = OutboundFrame::Error {
                            code: "console_lagged".to_string(),
                            message: "console output dropped, reconnect to resume".to_string(),
                        };
                        let _ = sender.send(Message::Text(frame.to_json().into())).await;
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = flush.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    let frame = OutboundFrame::Console {
                        logs: std::mem::take(&mut pending),
                    };
                    if sender.send(Message::Text(frame.to_json().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let reply = match parse_frame(text.as_str()) {
            Ok(InboundFrame::Stat) => {
                // sampling blocks, keep it off the command path
                let workload = Arc::clone(&workload);
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let _ = reply_tx.send(stat_frame(&workload).await).await;
                });
                None
            }
            Ok(frame) => dispatch(frame, &workload, &registry).await,
            Err(error) => Some(error),
        };
        if let Some(reply) = reply {
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    }

    drop(reply_tx);
    writer.abort();
    debug!(workload = %workload.id(), "Console socket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleConfig;
    use crate::environment::EnvironmentRegistry;
    use crate::operations::{Downloader, OperationRegistry};
    use crate::workload::FileDefinitionStore;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> AppState {
        AppState {
            registry: Arc::new(WorkloadRegistry::new(
                Arc::new(FileDefinitionStore::new(dir.path().join("defs"))),
                Arc::new(EnvironmentRegistry::with_builtin(
                    ConsoleConfig::default(),
                    Duration::from_millis(50),
                )),
                Arc::new(OperationRegistry::builtin(Arc::new(Downloader::new(None)))),
                dir.path().join("servers"),
                Duration::from_secs(5),
            )),
        }
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: Error| ApiError(e).into_response().status();
        assert_eq!(status(Error::NotFound("a".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::AlreadyRunning), StatusCode::CONFLICT);
        assert_eq!(status(Error::InvalidId("../a".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(Error::Other("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_create_then_read_back() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);
        let definition: WorkloadDefinition =
            serde_json::from_value(json!({"display": "Alpha", "data": {"port": {"value": 1}}}))
                .unwrap();

        let status = create_server(
            State(state.clone()),
            Path("alpha".to_string()),
            Json(definition),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(view) = get_server(State(state.clone()), Path("alpha".to_string()))
            .await
            .ok()
            .unwrap();
        assert_eq!(view.display, "Alpha");
        assert_eq!(view.environment, "standard");
        assert_eq!(view.data["port"].value, json!(1));

        let missing = get_server(State(state), Path("beta".to_string())).await;
        assert_eq!(
            missing.err().unwrap().into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
