//! Normalized execution outputs.
//!
//! Kernels report results as several message kinds on iopub. `OutputEvent`
//! flattens the ones a notebook renders into one shape, each carrying a
//! derived `text` field so simple clients never need to inspect MIME bundles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ipc::message::{
    DisplayDataContent, ErrorContent, ExecuteResultContent, Message, MessageType, StatusContent,
    StreamContent,
};

/// One output of an execution, or its terminal marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Value of the last expression.
    ExecuteResult {
        data: Map<String, Value>,
        execution_count: Option<u64>,
        text: String,
    },
    /// Text written to stdout or stderr.
    Stream { name: String, text: String },
    /// Uncaught exception.
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
        text: String,
    },
    /// Rich output from `display()` and inline plots.
    DisplayData {
        data: Map<String, Value>,
        metadata: Map<String, Value>,
        text: String,
    },
    /// The kernel went idle: the execution is over. Never forwarded.
    StatusIdle,
}

impl OutputEvent {
    /// Map a kernel message to an output.
    ///
    /// Returns `None` for message kinds with no output meaning (busy status,
    /// `execute_input`, comm traffic, unknown kinds) and for malformed content.
    pub fn from_message(message: &Message) -> Option<Self> {
        let parsed = match message.kind()? {
            MessageType::ExecuteResult => message
                .content_as::<ExecuteResultContent>()
                .map(|c| OutputEvent::ExecuteResult {
                    text: plain_text(&c.data),
                    data: c.data,
                    execution_count: c.execution_count,
                }),
            MessageType::Stream => message
                .content_as::<StreamContent>()
                .map(|c| OutputEvent::Stream {
                    name: c.name,
                    text: c.text,
                }),
            MessageType::Error => message.content_as::<ErrorContent>().map(|c| {
                let text = format!("{}: {}\n{}", c.ename, c.evalue, c.traceback.join("\n"));
                OutputEvent::Error {
                    ename: c.ename,
                    evalue: c.evalue,
                    traceback: c.traceback,
                    text,
                }
            }),
            MessageType::DisplayData => message
                .content_as::<DisplayDataContent>()
                .map(|c| OutputEvent::DisplayData {
                    text: plain_text(&c.data),
                    data: c.data,
                    metadata: c.metadata,
                }),
            MessageType::Status => {
                return match message.content_as::<StatusContent>() {
                    Ok(status) if status.execution_state == "idle" => Some(OutputEvent::StatusIdle),
                    _ => None,
                };
            }
            _ => return None,
        };

        match parsed {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(
                    "Dropping malformed {} content: {}",
                    message.header.msg_type,
                    e
                );
                None
            }
        }
    }

    /// Derived text of the output, if it has one.
    pub fn text(&self) -> Option<&str> {
        match self {
            OutputEvent::ExecuteResult { text, .. }
            | OutputEvent::Stream { text, .. }
            | OutputEvent::Error { text, .. }
            | OutputEvent::DisplayData { text, .. } => Some(text),
            OutputEvent::StatusIdle => None,
        }
    }

    /// Whether this marks the end of an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutputEvent::StatusIdle)
    }
}

/// `text/plain` from a MIME bundle, or the bundle serialized as JSON.
fn plain_text(data: &Map<String, Value>) -> String {
    match data.get("text/plain") {
        Some(Value::String(text)) => text.clone(),
        _ => Value::Object(data.clone()).to_string(),
    }
}
