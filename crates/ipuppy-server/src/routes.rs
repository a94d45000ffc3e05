//! HTTP and WebSocket routes for the iPuppy server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        rejection::JsonRejection,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use futures::{SinkExt, StreamExt};
use ipuppy_core::{
    CodeExecutor, Completions, ExecutionConfig, KernelConfig, KernelConnector, KernelManager,
};
use tower_http::cors::CorsLayer;

use crate::coordinator::StreamingCoordinator;
use crate::error::{ServerError, ServerResult};
use crate::hub::BroadcastHub;
use crate::protocol::{
    ClientMessage, CompleteBody, ERROR_EVENT, ExecuteBody, ExecuteResponse, KernelResponse,
    ServerEvent,
};

/// Application state shared across handlers.
pub struct AppState {
    /// The single managed kernel.
    pub kernels: Arc<KernelManager>,
    /// Buffered execution and completions.
    pub executor: CodeExecutor,
    /// Connected viewers.
    pub hub: Arc<BroadcastHub>,
    /// Streamed cell executions.
    pub coordinator: StreamingCoordinator,
}

impl AppState {
    /// State talking ZeroMQ to a kernel launched from `kernel`.
    pub fn new(kernel: KernelConfig, execution: ExecutionConfig) -> Self {
        let kernels = Arc::new(KernelManager::new(kernel));
        Self::from_executor(CodeExecutor::new(kernels, execution))
    }

    /// State using a custom kernel transport.
    pub fn with_connector(
        kernel: KernelConfig,
        execution: ExecutionConfig,
        connector: Arc<dyn KernelConnector>,
    ) -> Self {
        let kernels = Arc::new(KernelManager::new(kernel));
        Self::from_executor(CodeExecutor::with_connector(kernels, connector, execution))
    }

    fn from_executor(executor: CodeExecutor) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        Self {
            kernels: executor.kernels().clone(),
            coordinator: StreamingCoordinator::new(executor.clone(), hub.clone()),
            executor,
            hub,
        }
    }

    /// Reject ids other than the managed kernel's.
    fn check_kernel(&self, kernel_id: &str) -> ServerResult<()> {
        if kernel_id == self.kernels.kernel_id() {
            Ok(())
        } else {
            Err(ServerError::KernelNotFound(kernel_id.to_string()))
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/kernels", get(list_kernels_handler).post(start_kernel_handler))
        .route("/kernels/{kernel_id}", delete(stop_kernel_handler))
        .route("/kernels/{kernel_id}/restart", post(restart_kernel_handler))
        .route("/kernels/{kernel_id}/status", get(kernel_status_handler))
        .route("/kernels/{kernel_id}/execute", post(execute_handler))
        .route("/kernels/{kernel_id}/complete", post(complete_handler))
        .route("/cells/{cell_index}/execute", post(execute_cell_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_kernels_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "kernels": state.kernels.list() }))
}

async fn start_kernel_handler(State(state): State<Arc<AppState>>) -> ServerResult<Json<KernelResponse>> {
    let kernel_id = state.kernels.ensure_running().await?;
    Ok(Json(KernelResponse::new(kernel_id, "started")))
}

async fn stop_kernel_handler(
    State(state): State<Arc<AppState>>,
    Path(kernel_id): Path<String>,
) -> ServerResult<Json<KernelResponse>> {
    state.check_kernel(&kernel_id)?;
    if !state.kernels.stop().await {
        return Err(ServerError::KernelNotFound(kernel_id));
    }
    Ok(Json(KernelResponse::new(kernel_id, "stopped")))
}

async fn restart_kernel_handler(
    State(state): State<Arc<AppState>>,
    Path(kernel_id): Path<String>,
) -> ServerResult<Json<KernelResponse>> {
    state.check_kernel(&kernel_id)?;
    let kernel_id = state.kernels.restart().await?;
    Ok(Json(KernelResponse::new(kernel_id, "restarted")))
}

async fn kernel_status_handler(
    State(state): State<Arc<AppState>>,
    Path(kernel_id): Path<String>,
) -> Json<serde_json::Value> {
    // Unknown ids are simply not running.
    let status = if kernel_id == state.kernels.kernel_id() {
        state.executor.kernel_status()
    } else {
        ipuppy_core::KernelStatus::Stopped
    };
    Json(serde_json::json!({ "kernel_id": kernel_id, "status": status }))
}

async fn execute_handler(
    State(state): State<Arc<AppState>>,
    Path(kernel_id): Path<String>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> ServerResult<Json<ExecuteResponse>> {
    state.check_kernel(&kernel_id)?;
    let Json(body) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let outputs = state.executor.execute(&body.code).await?;
    Ok(Json(ExecuteResponse { outputs }))
}

async fn complete_handler(
    State(state): State<Arc<AppState>>,
    Path(kernel_id): Path<String>,
    body: Result<Json<CompleteBody>, JsonRejection>,
) -> ServerResult<Json<Completions>> {
    state.check_kernel(&kernel_id)?;
    let Json(body) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    Ok(Json(state.executor.completions(&body.code, body.cursor_pos).await))
}

/// Accept a cell execution; progress goes to WebSocket viewers.
async fn execute_cell_handler(
    State(state): State<Arc<AppState>>,
    Path(cell_index): Path<usize>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> ServerResult<impl IntoResponse> {
    let Json(body) = body.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    state.coordinator.spawn(cell_index, body.code);
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "cell_index": cell_index, "status": "accepted" })),
    ))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
///
/// The connection is registered as a hub observer for its whole lifetime.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (observer_id, mut events) = state.hub.subscribe();
    tracing::info!("Viewer {:?} connected", observer_id);

    let forward_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize {} event: {}", event.event, e),
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::ExecuteCell { cell_index, code }) => {
                    state.coordinator.spawn(cell_index, code);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse client message: {} (input: {})", e, text.as_str());
                    // Errors go to this viewer only; its forwarder is the hub channel.
                    state.hub.broadcast_to(
                        observer_id,
                        ServerEvent::new(
                            ERROR_EVENT,
                            serde_json::json!({ "message": format!("Invalid message format: {}", e) }),
                        ),
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    state.hub.unregister(observer_id);
    forward_task.abort();
    tracing::info!("Viewer {:?} disconnected", observer_id);
}
