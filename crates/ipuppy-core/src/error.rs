//! Error types for ipuppy-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for ipuppy-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ipuppy-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The kernel never wrote its connection file.
    #[error("kernel failed to start: connection file {} not created within {waited:?}", path.display())]
    StartupTimeout { path: PathBuf, waited: Duration },

    /// The kernel process exited before its connection file appeared.
    #[error("kernel process exited during startup ({status}){}", format_stderr(stderr))]
    StartupCrash { status: String, stderr: String },

    /// Failed to launch the interpreter process.
    #[error("failed to spawn kernel process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No live kernel to talk to.
    #[error("no kernel is running")]
    KernelUnavailable,

    /// The overall execution bound elapsed. Partial output is still returned.
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// One or more teardown steps failed. Logged, never propagated.
    #[error("kernel teardown finished with issues: {}", .0.join("; "))]
    TeardownPartialFailure(Vec<String>),

    /// The connection file exists but could not be used.
    #[error("invalid connection file {}: {message}", path.display())]
    ConnectionFile { path: PathBuf, message: String },

    /// A kernel message violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure talking to the kernel.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}
