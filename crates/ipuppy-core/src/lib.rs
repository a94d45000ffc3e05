//! Kernel lifecycle and code execution for iPuppy notebooks.
//!
//! This crate owns a single long-lived Jupyter kernel process and runs code on
//! it over the Jupyter messaging protocol:
//!
//! - [`KernelManager`] spawns, supervises and tears down the kernel process.
//! - [`CodeExecutor`] sends code and completion requests and streams back
//!   normalized [`OutputEvent`]s.
//! - [`ipc`] holds the message model, HMAC-signed framing and the ZeroMQ
//!   transport.

pub mod config;
pub mod connection;
pub mod error;
pub mod execute;
pub mod ipc;
pub mod kernel;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ExecutionConfig, KernelConfig};
pub use connection::ConnectionInfo;
pub use error::{Error, Result};
pub use execute::{
    CodeExecutor, Completions, ExecutionChannel, ExecutionRequest, KernelStatus, OutputEvent,
    StreamEnd,
};
pub use ipc::{KernelConnector, ZmqConnector};
pub use kernel::{KernelId, KernelManager, KernelState, KernelSummary, TeardownReport};
