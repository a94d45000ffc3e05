//! Code execution against the managed kernel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::ipc::{KernelConnector, ZmqConnector};
use crate::kernel::KernelManager;

use super::channel::ExecutionChannel;
use super::output::OutputEvent;

/// Code to run and the id that tags every message it produces.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub correlation_id: String,
}

impl ExecutionRequest {
    /// New request with a fresh correlation id.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Completion candidates for a cursor position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completions {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    pub metadata: Map<String, Value>,
}

impl Completions {
    /// No matches, anchored at the cursor.
    pub fn empty(cursor_pos: usize) -> Self {
        Self {
            matches: Vec::new(),
            cursor_start: cursor_pos,
            cursor_end: cursor_pos,
            metadata: Map::new(),
        }
    }
}

/// Coarse kernel status reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    Running,
    Stopped,
}

/// How a streamed execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The kernel reported idle for the request.
    Idle,
    /// The overall bound elapsed first.
    TimedOut,
}

/// Runs code on the kernel owned by a [`KernelManager`].
///
/// Every call opens its own channel and closes it before returning, so
/// executions never share sockets.
#[derive(Clone)]
pub struct CodeExecutor {
    kernels: Arc<KernelManager>,
    connector: Arc<dyn KernelConnector>,
    config: ExecutionConfig,
}

impl CodeExecutor {
    /// Executor speaking ZeroMQ to the kernel.
    pub fn new(kernels: Arc<KernelManager>, config: ExecutionConfig) -> Self {
        Self::with_connector(kernels, Arc::new(ZmqConnector), config)
    }

    /// Executor using a custom transport.
    pub fn with_connector(
        kernels: Arc<KernelManager>,
        connector: Arc<dyn KernelConnector>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            kernels,
            connector,
            config,
        }
    }

    /// The kernel manager this executor runs against.
    pub fn kernels(&self) -> &Arc<KernelManager> {
        &self.kernels
    }

    /// Run `code` and collect its outputs.
    ///
    /// A timeout is not an error: whatever arrived before it is returned.
    pub async fn execute(&self, code: &str) -> Result<Vec<OutputEvent>> {
        let mut outputs = Vec::new();
        self.execute_streaming(&ExecutionRequest::new(code), |event| outputs.push(event))
            .await?;
        Ok(outputs)
    }

    /// Run a request, handing each output to `on_event` in kernel order.
    pub async fn execute_streaming<F>(&self, request: &ExecutionRequest, on_event: F) -> Result<StreamEnd>
    where
        F: FnMut(OutputEvent) + Send,
    {
        let info = self.kernels.info().ok_or(Error::KernelUnavailable)?;
        let mut channel = ExecutionChannel::open(self.connector.as_ref(), &info, &self.config).await?;

        let outcome = run_request(&mut channel, request, on_event).await;
        channel.close().await;

        match outcome {
            Ok(()) => Ok(StreamEnd::Idle),
            Err(Error::ExecutionTimeout(after)) => {
                tracing::warn!(
                    "Execution {} timed out after {:?}; returning partial output",
                    request.correlation_id,
                    after
                );
                Ok(StreamEnd::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    /// Completion candidates at `cursor_pos`. Never fails.
    pub async fn completions(&self, code: &str, cursor_pos: usize) -> Completions {
        match self.try_completions(code, cursor_pos).await {
            Ok(Some(completions)) => completions,
            Ok(None) => Completions::empty(cursor_pos),
            Err(e) => {
                tracing::debug!("Completion request failed: {}", e);
                Completions::empty(cursor_pos)
            }
        }
    }

    async fn try_completions(&self, code: &str, cursor_pos: usize) -> Result<Option<Completions>> {
        let info = self.kernels.info().ok_or(Error::KernelUnavailable)?;
        let mut channel = ExecutionChannel::open(self.connector.as_ref(), &info, &self.config).await?;
        let reply = channel.complete(code, cursor_pos).await;
        channel.close().await;

        let reply = reply?;
        if reply.status != "ok" {
            tracing::debug!("Kernel answered complete_request with status {}", reply.status);
            return Ok(None);
        }
        Ok(Some(Completions {
            matches: reply.matches,
            cursor_start: reply.cursor_start,
            cursor_end: reply.cursor_end,
            metadata: reply.metadata,
        }))
    }

    /// Whether the kernel process is alive. Opens no channel.
    pub fn kernel_status(&self) -> KernelStatus {
        if self.kernels.is_alive() {
            KernelStatus::Running
        } else {
            KernelStatus::Stopped
        }
    }
}

async fn run_request<F>(channel: &mut ExecutionChannel, request: &ExecutionRequest, on_event: F) -> Result<()>
where
    F: FnMut(OutputEvent),
{
    channel.wait_for_ready().await?;
    channel.send_execute(request).await?;
    channel.stream_outputs(&request.correlation_id, on_event).await
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::ipc::{Message, MessageType};
    use crate::testing::{self, Emit, ScriptedConnector};

    fn fast_config() -> ExecutionConfig {
        ExecutionConfig {
            message_timeout: Duration::from_millis(50),
            overall_timeout: Duration::from_millis(600),
            completion_timeout: Duration::from_millis(300),
            ready_timeout: Duration::from_secs(2),
        }
    }

    fn code_of(request: &Message) -> String {
        request.content["code"].as_str().unwrap_or_default().to_string()
    }

    /// Minimal interpreter: understands the handful of snippets the tests send.
    fn python_like(request: &Message) -> Vec<Emit> {
        match request.kind() {
            Some(MessageType::ExecuteRequest) => {
                let outputs = match code_of(request).as_str() {
                    "1+1" => vec![testing::execute_result(request, 1, "2")],
                    "print('hi')" => vec![testing::stream(request, "stdout", "hi\n")],
                    "raise ValueError('boom')" => vec![testing::error(request, "ValueError", "boom")],
                    "for i in range(2): print(i)\n'done'" => vec![
                        testing::stream(request, "stdout", "0\n"),
                        testing::stream(request, "stdout", "1\n"),
                        testing::execute_result(request, 2, "'done'"),
                    ],
                    "import time; time.sleep(60)" => {
                        return vec![
                            testing::status(request, "busy"),
                            testing::stream(request, "stdout", "started\n"),
                        ];
                    }
                    _ => Vec::new(),
                };
                testing::busy_idle(request, outputs)
            }
            Some(MessageType::CompleteRequest) => vec![Emit::Shell(testing::reply(
                request,
                "complete_reply",
                serde_json::json!({
                    "status": "ok",
                    "matches": ["print", "property"],
                    "cursor_start": 0,
                    "cursor_end": 2,
                    "metadata": {}
                }),
            ))],
            _ => Vec::new(),
        }
    }

    async fn running_executor(
        temp: &TempDir,
        connector: ScriptedConnector,
    ) -> CodeExecutor {
        let kernels = Arc::new(KernelManager::new(testing::fake_kernel_config(temp.path())));
        kernels.ensure_running().await.unwrap();
        CodeExecutor::with_connector(kernels, Arc::new(connector), fast_config())
    }

    #[tokio::test]
    async fn test_execute_returns_result_text() {
        let temp = TempDir::new().unwrap();
        let executor = running_executor(&temp, ScriptedConnector::new(python_like)).await;

        let outputs = executor.execute("1+1").await.unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].text(), Some("2"));
        executor.kernels().stop().await;
    }

    #[tokio::test]
    async fn test_stream_and_result_keep_kernel_order() {
        let temp = TempDir::new().unwrap();
        let executor = running_executor(&temp, ScriptedConnector::new(python_like)).await;

        let outputs = executor
            .execute("for i in range(2): print(i)\n'done'")
            .await
            .unwrap();

        let texts: Vec<_> = outputs.iter().filter_map(OutputEvent::text).collect();
        assert_eq!(texts, vec!["0\n", "1\n", "'done'"]);
        executor.kernels().stop().await;
    }

    #[tokio::test]
    async fn test_error_output_carries_exception() {
        let temp = TempDir::new().unwrap();
        let executor = running_executor(&temp, ScriptedConnector::new(python_like)).await;

        let outputs = executor.execute("raise ValueError('boom')").await.unwrap();

        match outputs.as_slice() {
            [OutputEvent::Error { ename, evalue, text, .. }] => {
                assert_eq!(ename, "ValueError");
                assert_eq!(evalue, "boom");
                assert!(text.starts_with("ValueError: boom\n"));
            }
            other => panic!("Unexpected outputs: {:?}", other),
        }
        executor.kernels().stop().await;
    }

    #[tokio::test]
    async fn test_foreign_messages_are_never_surfaced() {
        let temp = TempDir::new().unwrap();
        let connector = ScriptedConnector::new(|request: &Message| {
            if request.kind() != Some(MessageType::ExecuteRequest) {
                return Vec::new();
            }
            let other = Message::request("someone-else", MessageType::ExecuteRequest, serde_json::json!({}));
            vec![
                testing::status(request, "busy"),
                testing::stream(&other, "stdout", "not mine\n"),
                testing::status(&other, "idle"),
                testing::stream(request, "stdout", "mine\n"),
                testing::status(request, "idle"),
            ]
        });
        let executor = running_executor(&temp, connector).await;

        let outputs = executor.execute("x").await.unwrap();

        let texts: Vec<_> = outputs.iter().filter_map(OutputEvent::text).collect();
        assert_eq!(texts, vec!["mine\n"]);
        executor.kernels().stop().await;
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_output() {
        let temp = TempDir::new().unwrap();
        let connector = ScriptedConnector::new(python_like);
        let executor = running_executor(&temp, connector.clone()).await;

        let mut seen = Vec::new();
        let end = executor
            .execute_streaming(&ExecutionRequest::new("import time; time.sleep(60)"), |event| {
                seen.push(event)
            })
            .await
            .unwrap();

        assert_eq!(end, StreamEnd::TimedOut);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text(), Some("started\n"));
        assert_eq!(connector.connects(), connector.closes());
        executor.kernels().stop().await;
    }

    #[tokio::test]
    async fn test_outputs_arriving_slowly_are_still_collected() {
        let temp = TempDir::new().unwrap();
        let connector = ScriptedConnector::new(|request: &Message| {
            if request.kind() != Some(MessageType::ExecuteRequest) {
                return Vec::new();
            }
            // Quiet for longer than one message timeout, shorter than the overall one.
            testing::busy_idle(
                request,
                vec![
                    Emit::Pause(Duration::from_millis(150)),
                    testing::stream(request, "stdout", "late\n"),
                ],
            )
        });
        let executor = running_executor(&temp, connector).await;

        let outputs = executor.execute("slow").await.unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].text(), Some("late\n"));
        executor.kernels().stop().await;
    }

    #[tokio::test]
    async fn test_execute_without_kernel_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let connector = ScriptedConnector::new(python_like);
        let kernels = Arc::new(KernelManager::new(testing::fake_kernel_config(temp.path())));
        let executor = CodeExecutor::with_connector(kernels, Arc::new(connector.clone()), fast_config());

        let err = executor.execute("1+1").await.unwrap_err();

        assert!(matches!(err, Error::KernelUnavailable));
        assert_eq!(connector.connects(), 0);
        assert_eq!(executor.kernel_status(), KernelStatus::Stopped);
    }

    #[tokio::test]
    async fn test_completions_without_kernel_are_empty() {
        let temp = TempDir::new().unwrap();
        let kernels = Arc::new(KernelManager::new(testing::fake_kernel_config(temp.path())));
        let executor = CodeExecutor::with_connector(
            kernels,
            Arc::new(ScriptedConnector::new(python_like)),
            fast_config(),
        );

        let completions = executor.completions("pr", 2).await;

        assert_eq!(completions, Completions::empty(2));
    }

    #[tokio::test]
    async fn test_completions_from_kernel() {
        let temp = TempDir::new().unwrap();
        let connector = ScriptedConnector::new(python_like);
        let executor = running_executor(&temp, connector.clone()).await;

        let completions = executor.completions("pr", 2).await;

        assert_eq!(completions.matches, vec!["print", "property"]);
        assert_eq!((completions.cursor_start, completions.cursor_end), (0, 2));
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
        assert_eq!(executor.kernel_status(), KernelStatus::Running);
        executor.kernels().stop().await;
    }

    #[tokio::test]
    async fn test_silent_completion_times_out_to_empty() {
        let temp = TempDir::new().unwrap();
        let executor = running_executor(&temp, ScriptedConnector::new(|_: &Message| Vec::new())).await;

        let completions = executor.completions("pr", 2).await;

        assert!(completions.matches.is_empty());
        assert_eq!(completions.cursor_start, 2);
        executor.kernels().stop().await;
    }
}
