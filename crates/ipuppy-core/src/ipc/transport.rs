//! Transport seam between the executor and a kernel's sockets.
//!
//! The executor only needs two logical channels: shell (request/reply) and
//! iopub (broadcast). `KernelConnector` opens them for a connection file;
//! `ZmqConnector` is the production implementation.

use async_trait::async_trait;

use crate::connection::ConnectionInfo;
use crate::error::Result;

use super::message::Message;

/// Opens channels to a running kernel.
#[async_trait]
pub trait KernelConnector: Send + Sync {
    /// Connect shell and iopub for the given kernel.
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn KernelChannels>>;
}

/// An open pair of kernel channels owned by one client.
///
/// Receive methods must be cancel safe: callers drop them on timeout.
#[async_trait]
pub trait KernelChannels: Send {
    /// Send a request on the shell channel.
    async fn send_shell(&mut self, message: Message) -> Result<()>;

    /// Next reply on the shell channel.
    async fn recv_shell(&mut self) -> Result<Message>;

    /// Next broadcast on the iopub channel.
    async fn recv_iopub(&mut self) -> Result<Message>;

    /// Close both channels.
    async fn close(self: Box<Self>);
}
