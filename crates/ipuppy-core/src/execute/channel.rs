//! A short-lived client session with a running kernel.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use crate::config::ExecutionConfig;
use crate::connection::ConnectionInfo;
use crate::error::{Error, Result};
use crate::ipc::message::{
    CompleteReplyContent, CompleteRequestContent, ExecuteRequestContent, Message, MessageType,
};
use crate::ipc::{KernelChannels, KernelConnector};
use crate::wait;

use super::output::OutputEvent;
use super::ExecutionRequest;

/// How long to look for already-delivered shell replies.
const SHELL_DRAIN: Duration = Duration::from_millis(10);

/// Shell and iopub channels opened for one execute or completion.
///
/// Each operation opens its own channel, so concurrent executions never share
/// a subscription. Messages that belong to other clients are filtered by
/// parent id.
pub struct ExecutionChannel {
    channels: Box<dyn KernelChannels>,
    session: String,
    config: ExecutionConfig,
}

impl ExecutionChannel {
    /// Connect to the kernel described by `info`.
    pub async fn open(
        connector: &dyn KernelConnector,
        info: &ConnectionInfo,
        config: &ExecutionConfig,
    ) -> Result<Self> {
        let channels = wait::until_deadline(Instant::now() + config.ready_timeout, connector.connect(info))
            .await
            .map_err(|elapsed| {
                Error::Transport(format!("connecting to kernel timed out after {:?}", elapsed.waited))
            })??;

        Ok(Self {
            channels,
            session: uuid::Uuid::new_v4().to_string(),
            config: config.clone(),
        })
    }

    /// Block until iopub is known to be live.
    ///
    /// A fresh SUB socket misses everything published before its subscription
    /// reached the kernel. Any iopub message proves the subscription works,
    /// so one `kernel_info_request` is sent and the channel listens. A probe
    /// is only repeated once the kernel has answered the previous one on
    /// shell without the matching status reaching iopub. A kernel busy with
    /// another cell therefore holds a single queued probe, not one per poll.
    pub async fn wait_for_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.ready_timeout;
        let mut probe_id = self.send_probe().await?;
        let mut probes = 1u32;

        loop {
            let received = wait::within(self.config.message_timeout, deadline, self.channels.recv_iopub()).await;

            match received {
                Ok(Ok(_)) => {
                    tracing::debug!("Kernel ready after {} probe(s)", probes);
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) if Instant::now() >= deadline => {
                    return Err(Error::Transport(format!(
                        "kernel did not answer kernel_info_request within {:?}",
                        self.config.ready_timeout
                    )));
                }
                Err(_) => {
                    if self.probe_answered(&probe_id).await? {
                        tracing::debug!("Probe answered on shell only; subscription was late");
                        probe_id = self.send_probe().await?;
                        probes += 1;
                    }
                }
            }
        }
    }

    async fn send_probe(&mut self) -> Result<String> {
        let probe = Message::request(&self.session, MessageType::KernelInfoRequest, json!({}));
        let probe_id = probe.msg_id().to_string();
        self.channels.send_shell(probe).await?;
        Ok(probe_id)
    }

    /// Drain pending shell replies; true if one answers `probe_id`.
    async fn probe_answered(&mut self, probe_id: &str) -> Result<bool> {
        let mut answered = false;
        while let Ok(reply) =
            wait::until_deadline(Instant::now() + SHELL_DRAIN, self.channels.recv_shell()).await
        {
            answered |= reply?.is_child_of(probe_id);
        }
        Ok(answered)
    }

    /// Send `execute_request` tagged with the request's correlation id.
    pub async fn send_execute(&mut self, request: &ExecutionRequest) -> Result<()> {
        let content = serde_json::to_value(ExecuteRequestContent::new(&request.code))?;
        let message = Message::request_with_id(
            &request.correlation_id,
            &self.session,
            MessageType::ExecuteRequest,
            content,
        );
        self.channels.send_shell(message).await
    }

    /// Forward outputs of `correlation_id` until the kernel goes idle.
    ///
    /// Each receive waits at most the message timeout; a quiet kernel is
    /// polled again until the overall timeout, which yields
    /// `Error::ExecutionTimeout`. Outputs already forwarded stay delivered.
    pub async fn stream_outputs<F>(&mut self, correlation_id: &str, mut on_event: F) -> Result<()>
    where
        F: FnMut(OutputEvent),
    {
        let deadline = Instant::now() + self.config.overall_timeout;

        loop {
            if Instant::now() >= deadline {
                return Err(Error::ExecutionTimeout(self.config.overall_timeout));
            }

            let received = wait::within(
                self.config.message_timeout,
                deadline,
                self.channels.recv_iopub(),
            )
            .await;
            let message = match received {
                Ok(message) => message?,
                Err(_) => continue,
            };

            if !message.is_child_of(correlation_id) {
                tracing::trace!(
                    "Skipping {} for another request ({:?})",
                    message.header.msg_type,
                    message.parent_msg_id()
                );
                continue;
            }

            match OutputEvent::from_message(&message) {
                Some(event) if event.is_terminal() => return Ok(()),
                Some(event) => on_event(event),
                None => {}
            }
        }
    }

    /// Request completions and wait for the matching reply.
    pub async fn complete(&mut self, code: &str, cursor_pos: usize) -> Result<CompleteReplyContent> {
        let content = serde_json::to_value(CompleteRequestContent {
            code: code.to_string(),
            cursor_pos,
        })?;
        let request = Message::request(&self.session, MessageType::CompleteRequest, content);
        let request_id = request.msg_id().to_string();
        self.channels.send_shell(request).await?;

        let reply = wait::until_deadline(
            Instant::now() + self.config.completion_timeout,
            next_shell_reply(self.channels.as_mut(), &request_id, MessageType::CompleteReply),
        )
        .await
        .map_err(|elapsed| Error::ExecutionTimeout(elapsed.waited))??;

        Ok(reply.content_as::<CompleteReplyContent>()?)
    }

    /// Close both sockets.
    pub async fn close(self) {
        self.channels.close().await;
    }
}

async fn next_iopub_child(channels: &mut dyn KernelChannels, parent: &str) -> Result<Message> {
    loop {
        let message = channels.recv_iopub().await?;
        if message.is_child_of(parent) {
            return Ok(message);
        }
    }
}

async fn next_shell_reply(
    channels: &mut dyn KernelChannels,
    parent: &str,
    kind: MessageType,
) -> Result<Message> {
    loop {
        let message = channels.recv_shell().await?;
        // Replies to earlier readiness probes arrive here too.
        if message.is_child_of(parent) && message.kind() == Some(kind) {
            return Ok(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;

    fn info() -> ConnectionInfo {
        ConnectionInfo {
            ip: "127.0.0.1".to_string(),
            transport: "tcp".to_string(),
            shell_port: 50001,
            iopub_port: 50002,
            stdin_port: 50003,
            control_port: 50004,
            hb_port: 50005,
            key: String::new(),
            signature_scheme: "hmac-sha256".to_string(),
            kernel_name: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_outlasts_a_long_running_cell() {
        // The probe queues behind a 12s execution on the kernel.
        let connector = ScriptedConnector::new(|_| Vec::new()).with_probe_delay(Duration::from_secs(12));
        let config = ExecutionConfig::default();
        let mut channel = ExecutionChannel::open(&connector, &info(), &config).await.unwrap();

        channel.wait_for_ready().await.unwrap();

        assert_eq!(connector.probes(), 1);
        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_reprobes_when_status_is_missed() {
        let connector = ScriptedConnector::new(|_| Vec::new()).with_missed_probes(2);
        let config = ExecutionConfig::default();
        let mut channel = ExecutionChannel::open(&connector, &info(), &config).await.unwrap();

        channel.wait_for_ready().await.unwrap();

        assert_eq!(connector.probes(), 3);
        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_gives_up_at_deadline() {
        let connector = ScriptedConnector::new(|_| Vec::new()).with_probe_delay(Duration::from_secs(60));
        let config = ExecutionConfig::default();
        let mut channel = ExecutionChannel::open(&connector, &info(), &config).await.unwrap();

        let err = channel.wait_for_ready().await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)), "unexpected error: {}", err);
        assert_eq!(connector.probes(), 1);
        channel.close().await;
    }
}
