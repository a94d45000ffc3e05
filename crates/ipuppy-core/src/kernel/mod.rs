//! Kernel process management.
//!
//! A `KernelManager` owns at most one interpreter process. The process writes
//! a connection file on startup; the manager reads it and hands the resulting
//! `ConnectionInfo` to executors.

mod manager;
mod process;

pub use manager::{KernelId, KernelManager, KernelState, KernelSummary};
pub use process::{KernelProcess, TeardownReport};
