//! Communication with Jupyter kernels.
//!
//! This module provides the message model, the signed wire framing, and the
//! transport used to reach a kernel's shell and iopub channels.

pub mod message;
pub mod transport;
pub mod wire;
mod zmq;

pub use message::{Header, Message, MessageType};
pub use transport::{KernelChannels, KernelConnector};
pub use wire::Signer;
pub use zmq::{ZmqChannels, ZmqConnector};
