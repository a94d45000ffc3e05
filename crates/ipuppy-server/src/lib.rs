//! iPuppy notebook server.
//!
//! Exposes the kernel over HTTP and streams cell executions to every
//! connected WebSocket viewer.
//!
//! # Architecture
//!
//! - **Routes**: HTTP kernel endpoints and the `/ws` viewer socket
//! - **Hub**: fan-out of server events to registered observers
//! - **Coordinator**: runs a cell and broadcasts its `cell_update` events
//! - **Protocol**: wire shapes of events and request bodies

pub mod coordinator;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use ipuppy_core::{ExecutionConfig, KernelConfig};

pub use coordinator::{ExecutionPhase, ExecutionSession, StreamingCoordinator};
pub use error::{ServerError, ServerResult};
pub use hub::{BroadcastHub, ChannelObserver, Observer, ObserverId};
pub use protocol::{CELL_UPDATE_EVENT, CellStatus, CellUpdate, ClientMessage, ServerEvent};
pub use routes::{AppState, create_router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// How to launch the kernel.
    pub kernel: KernelConfig,
    /// Bounds for executions and completions.
    pub execution: ExecutionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            kernel: KernelConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

/// Run the server until Ctrl+C, then stop the kernel.
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", config.host, config.port)))?;

    let state = Arc::new(AppState::new(config.kernel, config.execution));
    let app = create_router(state.clone());

    tracing::info!("Starting iPuppy server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    if state.kernels.stop().await {
        tracing::info!("Kernel stopped");
    }
    tracing::info!("Server shutdown complete");

    Ok(())
}
