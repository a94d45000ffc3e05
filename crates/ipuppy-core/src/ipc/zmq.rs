//! ZeroMQ transport to a Jupyter kernel.

use async_trait::async_trait;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::connection::{Channel, ConnectionInfo};
use crate::error::{Error, Result};

use super::message::Message;
use super::transport::{KernelChannels, KernelConnector};
use super::wire::{self, Signer};

/// Connects to kernels over ZeroMQ using the connection file endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZmqConnector;

#[async_trait]
impl KernelConnector for ZmqConnector {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn KernelChannels>> {
        let shell_endpoint = info.endpoint(Channel::Shell);
        let iopub_endpoint = info.endpoint(Channel::Iopub);

        let mut shell = DealerSocket::new();
        shell
            .connect(&shell_endpoint)
            .await
            .map_err(|e| Error::Transport(format!("shell connect {}: {}", shell_endpoint, e)))?;

        let mut iopub = SubSocket::new();
        iopub
            .connect(&iopub_endpoint)
            .await
            .map_err(|e| Error::Transport(format!("iopub connect {}: {}", iopub_endpoint, e)))?;
        iopub
            .subscribe("")
            .await
            .map_err(|e| Error::Transport(format!("iopub subscribe: {}", e)))?;

        tracing::debug!("Connected to kernel at {} / {}", shell_endpoint, iopub_endpoint);

        Ok(Box::new(ZmqChannels {
            shell,
            iopub,
            signer: Signer::new(&info.key),
        }))
    }
}

/// Shell DEALER and iopub SUB sockets for one client.
pub struct ZmqChannels {
    shell: DealerSocket,
    iopub: SubSocket,
    signer: Signer,
}

impl ZmqChannels {
    /// Decode a raw multipart message. Unverifiable messages are logged and skipped.
    fn decode(&self, raw: ZmqMessage, channel: &str) -> Option<Message> {
        match wire::decode(&raw.into_vec(), &self.signer) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Dropping undecodable {} message: {}", channel, e);
                None
            }
        }
    }
}

#[async_trait]
impl KernelChannels for ZmqChannels {
    async fn send_shell(&mut self, message: Message) -> Result<()> {
        let frames = wire::encode(&message, &self.signer)?;
        let raw = ZmqMessage::try_from(frames)
            .map_err(|e| Error::Protocol(format!("cannot build shell message: {}", e)))?;
        self.shell
            .send(raw)
            .await
            .map_err(|e| Error::Transport(format!("shell send: {}", e)))
    }

    async fn recv_shell(&mut self) -> Result<Message> {
        loop {
            let raw = self
                .shell
                .recv()
                .await
                .map_err(|e| Error::Transport(format!("shell recv: {}", e)))?;
            if let Some(message) = self.decode(raw, "shell") {
                return Ok(message);
            }
        }
    }

    async fn recv_iopub(&mut self) -> Result<Message> {
        loop {
            let raw = self
                .iopub
                .recv()
                .await
                .map_err(|e| Error::Transport(format!("iopub recv: {}", e)))?;
            if let Some(message) = self.decode(raw, "iopub") {
                return Ok(message);
            }
        }
    }

    async fn close(self: Box<Self>) {
        let this = *self;
        for e in this.shell.close().await {
            tracing::debug!("shell close: {}", e);
        }
        for e in this.iopub.close().await {
            tracing::debug!("iopub close: {}", e);
        }
    }
}
