//! Realtime protocol messages.
//!
//! Everything pushed to observers is a [`ServerEvent`] envelope; execution
//! progress travels as a `cell_update` event carrying a [`CellUpdate`].

use ipuppy_core::OutputEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name for execution progress.
pub const CELL_UPDATE_EVENT: &str = "cell_update";

/// Event name for per-connection protocol errors.
pub const ERROR_EVENT: &str = "error";

/// Envelope pushed to every observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub payload: Value,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Status of a cell execution as seen by viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Running,
    Completed,
    Error,
}

/// Output attached to a cell update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellOutput {
    /// A kernel output.
    Event(OutputEvent),
    /// A hard failure, reported as plain text.
    Failure { text: String },
}

/// Progress of one cell execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub cell_index: usize,
    pub status: CellStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CellOutput>,
    /// Set on outputs: append to the cell's existing outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
}

impl CellUpdate {
    /// Execution accepted.
    pub fn running(cell_index: usize) -> Self {
        Self {
            cell_index,
            status: CellStatus::Running,
            output: None,
            append: None,
        }
    }

    /// One streamed output.
    pub fn output(cell_index: usize, event: OutputEvent) -> Self {
        Self {
            cell_index,
            status: CellStatus::Running,
            output: Some(CellOutput::Event(event)),
            append: Some(true),
        }
    }

    /// Execution finished, on idle or on timeout.
    pub fn completed(cell_index: usize) -> Self {
        Self {
            cell_index,
            status: CellStatus::Completed,
            output: None,
            append: None,
        }
    }

    /// Execution failed.
    pub fn failed(cell_index: usize, message: impl Into<String>) -> Self {
        Self {
            cell_index,
            status: CellStatus::Error,
            output: Some(CellOutput::Failure {
                text: message.into(),
            }),
            append: None,
        }
    }
}

/// Messages sent from client to server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Execute code for a cell; progress is broadcast to all viewers.
    ExecuteCell {
        /// Position of the cell in the notebook.
        cell_index: usize,
        /// Source to run.
        code: String,
    },
}

/// `{code}` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteBody {
    pub code: String,
}

/// `{code, cursor_pos}` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteBody {
    pub code: String,
    pub cursor_pos: usize,
}

/// `{kernel_id, status}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelResponse {
    pub kernel_id: String,
    pub status: String,
}

impl KernelResponse {
    pub fn new(kernel_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            kernel_id: kernel_id.into(),
            status: status.into(),
        }
    }
}

/// `{outputs}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub outputs: Vec<OutputEvent>,
}
