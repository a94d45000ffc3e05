//! Streams cell executions to every viewer.

use std::sync::Arc;

use ipuppy_core::{CodeExecutor, ExecutionRequest, StreamEnd};
use tokio::task::JoinHandle;

use crate::hub::BroadcastHub;
use crate::protocol::{CELL_UPDATE_EVENT, CellUpdate};

/// Phase of one cell execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Running,
    Completed,
    Errored,
}

/// Bookkeeping for one accepted execution.
#[derive(Debug, Clone)]
pub struct ExecutionSession {
    pub cell_index: usize,
    pub correlation_id: String,
    pub phase: ExecutionPhase,
}

/// Drives executions and broadcasts their progress as `cell_update` events.
///
/// Executions are independent: each opens its own channel and a failure is
/// reported only for the cell that hit it.
#[derive(Clone)]
pub struct StreamingCoordinator {
    executor: CodeExecutor,
    hub: Arc<BroadcastHub>,
}

impl StreamingCoordinator {
    pub fn new(executor: CodeExecutor, hub: Arc<BroadcastHub>) -> Self {
        Self { executor, hub }
    }

    fn emit(&self, update: &CellUpdate) {
        self.hub.publish(CELL_UPDATE_EVENT, update);
    }

    /// Run `code` for `cell_index`, broadcasting every step.
    ///
    /// Starts the kernel first if none is running. Never fails: errors become
    /// an `error` update.
    pub async fn run(&self, cell_index: usize, code: String) -> ExecutionSession {
        let request = ExecutionRequest::new(code);
        let mut session = ExecutionSession {
            cell_index,
            correlation_id: request.correlation_id.clone(),
            phase: ExecutionPhase::Running,
        };
        self.emit(&CellUpdate::running(cell_index));

        match self.drive(cell_index, &request).await {
            Ok(end) => {
                if end == StreamEnd::TimedOut {
                    tracing::info!("Cell {} timed out; reporting partial output", cell_index);
                }
                session.phase = ExecutionPhase::Completed;
                self.emit(&CellUpdate::completed(cell_index));
            }
            Err(e) => {
                tracing::error!("Cell {} failed: {}", cell_index, e);
                session.phase = ExecutionPhase::Errored;
                self.emit(&CellUpdate::failed(cell_index, e.to_string()));
            }
        }

        session
    }

    async fn drive(&self, cell_index: usize, request: &ExecutionRequest) -> ipuppy_core::Result<StreamEnd> {
        self.executor.kernels().ensure_running().await?;

        let hub = self.hub.clone();
        self.executor
            .execute_streaming(request, move |event| {
                hub.publish(CELL_UPDATE_EVENT, &CellUpdate::output(cell_index, event));
            })
            .await
    }

    /// Run on a separate task.
    ///
    /// A panic inside the execution is reported as an `error` update for that
    /// cell and yields `None`.
    pub fn spawn(&self, cell_index: usize, code: String) -> JoinHandle<Option<ExecutionSession>> {
        let coordinator = self.clone();
        let hub = self.hub.clone();

        tokio::spawn(async move {
            let execution = tokio::spawn(async move { coordinator.run(cell_index, code).await });
            match execution.await {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::error!("Execution task for cell {} failed: {}", cell_index, e);
                    hub.publish(
                        CELL_UPDATE_EVENT,
                        &CellUpdate::failed(cell_index, format!("execution task failed: {}", e)),
                    );
                    None
                }
            }
        })
    }
}
