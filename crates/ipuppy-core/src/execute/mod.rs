//! Code execution.
//!
//! `CodeExecutor` is the entry point. It opens an `ExecutionChannel` per
//! request, demultiplexes iopub traffic by correlation id and normalizes what
//! it keeps into `OutputEvent`s.

mod channel;
mod executor;
mod output;

pub use channel::ExecutionChannel;
pub use executor::{CodeExecutor, Completions, ExecutionRequest, KernelStatus, StreamEnd};
pub use output::OutputEvent;
