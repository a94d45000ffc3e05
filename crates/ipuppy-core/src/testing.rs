//! In-process kernel doubles.
//!
//! `ScriptedConnector` stands in for a kernel's sockets: every shell request
//! is handed to a script that decides what the kernel publishes back.
//! `fake_kernel_config` launches a shell process that behaves like a kernel
//! at the process level (writes a connection file, then idles).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::KernelConfig;
use crate::connection::ConnectionInfo;
use crate::error::{Error, Result};
use crate::ipc::{KernelChannels, KernelConnector, Message, MessageType};

/// One step of a scripted kernel response.
#[derive(Debug, Clone)]
pub enum Emit {
    /// Publish on iopub.
    Iopub(Message),
    /// Reply on shell.
    Shell(Message),
    /// Wait before the next step.
    Pause(Duration),
}

type Script = dyn Fn(&Message) -> Vec<Emit> + Send + Sync;

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    closes: AtomicUsize,
    probes: AtomicUsize,
}

/// Connector whose kernel is a closure.
///
/// Readiness probes are answered automatically; every other shell request is
/// passed to the script.
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Arc<Script>,
    counters: Arc<Counters>,
    probe_delay: Duration,
    missed_probes: usize,
}

impl ScriptedConnector {
    pub fn new(script: impl Fn(&Message) -> Vec<Emit> + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            counters: Arc::default(),
            probe_delay: Duration::ZERO,
            missed_probes: 0,
        }
    }

    /// Answer readiness probes only after `delay`, like a kernel still busy
    /// with an earlier request.
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// On every channel, the first `count` probes get a shell reply but their
    /// iopub status is lost, like a subscription that is not live yet.
    pub fn with_missed_probes(mut self, count: usize) -> Self {
        self.missed_probes = count;
        self
    }

    /// Number of readiness probes received over all channels.
    pub fn probes(&self) -> usize {
        self.counters.probes.load(Ordering::SeqCst)
    }

    /// Number of channels opened so far.
    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Number of channels closed so far.
    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KernelConnector for ScriptedConnector {
    async fn connect(&self, _info: &ConnectionInfo) -> Result<Box<dyn KernelChannels>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let (iopub_tx, iopub_rx) = mpsc::unbounded_channel();
        let (shell_tx, shell_rx) = mpsc::unbounded_channel();
        Ok(Box::new(ScriptedChannels {
            script: self.script.clone(),
            counters: self.counters.clone(),
            probe_delay: self.probe_delay,
            missed_probes: self.missed_probes,
            iopub_tx,
            iopub_rx,
            shell_tx,
            shell_rx,
        }))
    }
}

struct ScriptedChannels {
    script: Arc<Script>,
    counters: Arc<Counters>,
    probe_delay: Duration,
    missed_probes: usize,
    iopub_tx: mpsc::UnboundedSender<Message>,
    iopub_rx: mpsc::UnboundedReceiver<Message>,
    shell_tx: mpsc::UnboundedSender<Message>,
    shell_rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl KernelChannels for ScriptedChannels {
    async fn send_shell(&mut self, message: Message) -> Result<()> {
        let steps = match message.kind() {
            Some(MessageType::KernelInfoRequest) => {
                self.counters.probes.fetch_add(1, Ordering::SeqCst);
                let answer = Emit::Shell(reply(&message, "kernel_info_reply", json!({"status": "ok"})));
                if self.missed_probes > 0 {
                    self.missed_probes -= 1;
                    vec![Emit::Pause(self.probe_delay), answer]
                } else {
                    vec![
                        Emit::Pause(self.probe_delay),
                        status(&message, "busy"),
                        answer,
                        status(&message, "idle"),
                    ]
                }
            }
            _ => (self.script)(&message),
        };

        let iopub = self.iopub_tx.clone();
        let shell = self.shell_tx.clone();
        tokio::spawn(async move {
            for step in steps {
                match step {
                    Emit::Iopub(msg) => {
                        let _ = iopub.send(msg);
                    }
                    Emit::Shell(msg) => {
                        let _ = shell.send(msg);
                    }
                    Emit::Pause(duration) => tokio::time::sleep(duration).await,
                }
            }
        });
        Ok(())
    }

    async fn recv_shell(&mut self) -> Result<Message> {
        self.shell_rx
            .recv()
            .await
            .ok_or_else(|| Error::Transport("scripted shell closed".to_string()))
    }

    async fn recv_iopub(&mut self) -> Result<Message> {
        self.iopub_rx
            .recv()
            .await
            .ok_or_else(|| Error::Transport("scripted iopub closed".to_string()))
    }

    async fn close(self: Box<Self>) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A kernel message of type `msg_type` answering `request`.
pub fn reply(request: &Message, msg_type: &str, content: Value) -> Message {
    let mut message = Message::request(&request.header.session, MessageType::Status, content);
    message.header.msg_type = msg_type.to_string();
    message.header.username = "kernel".to_string();
    message.parent_header = serde_json::to_value(&request.header).unwrap_or_default();
    message
}

/// iopub `status` for `request`.
pub fn status(request: &Message, state: &str) -> Emit {
    Emit::Iopub(reply(request, "status", json!({"execution_state": state})))
}

/// iopub `stream` for `request`.
pub fn stream(request: &Message, name: &str, text: &str) -> Emit {
    Emit::Iopub(reply(request, "stream", json!({"name": name, "text": text})))
}

/// iopub `execute_result` with a plain text value.
pub fn execute_result(request: &Message, count: u64, text: &str) -> Emit {
    Emit::Iopub(reply(
        request,
        "execute_result",
        json!({"data": {"text/plain": text}, "metadata": {}, "execution_count": count}),
    ))
}

/// iopub `error` for `request`.
pub fn error(request: &Message, ename: &str, evalue: &str) -> Emit {
    Emit::Iopub(reply(
        request,
        "error",
        json!({
            "ename": ename,
            "evalue": evalue,
            "traceback": [format!("{}: {}", ename, evalue)]
        }),
    ))
}

/// The usual busy, outputs, idle envelope around `outputs`.
pub fn busy_idle(request: &Message, outputs: Vec<Emit>) -> Vec<Emit> {
    let mut steps = vec![status(request, "busy")];
    steps.extend(outputs);
    steps.push(status(request, "idle"));
    steps
}

/// Connection document with placeholder ports, for kernels nobody connects to.
pub fn fake_connection() -> String {
    json!({
        "ip": "127.0.0.1",
        "transport": "tcp",
        "shell_port": 50001,
        "iopub_port": 50002,
        "stdin_port": 50003,
        "control_port": 50004,
        "hb_port": 50005,
        "key": "",
        "signature_scheme": "hmac-sha256"
    })
    .to_string()
}

/// `sh` body of a kernel that logs its pid, writes `$3` atomically to the
/// connection file and idles.
pub const WELL_BEHAVED_KERNEL: &str =
    r#"echo $$ >> "$2"; printf '%s' "$3" > "$1.tmp" && mv "$1.tmp" "$1"; exec sleep 60"#;

/// Kernel config that launches `sh` pretending to be a kernel.
///
/// The process appends its pid to `spawns.log`, writes a connection file and
/// sleeps. Ports in the file are never connected to.
pub fn fake_kernel_config(runtime_dir: &Path) -> KernelConfig {
    shell_kernel_config(runtime_dir, WELL_BEHAVED_KERNEL, &fake_connection())
}

/// Kernel config running an arbitrary `sh` script.
///
/// The script sees `$1` = connection file, `$2` = spawn log, `$3` = `payload`.
pub fn shell_kernel_config(runtime_dir: &Path, script: &str, payload: &str) -> KernelConfig {
    KernelConfig {
        kernel_id: "test-kernel".to_string(),
        runtime_dir: runtime_dir.to_path_buf(),
        argv: vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "fake-kernel".to_string(),
            crate::config::CONNECTION_FILE_PLACEHOLDER.to_string(),
            spawn_log(runtime_dir).to_string_lossy().to_string(),
            payload.to_string(),
        ],
        startup_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(20),
        interrupt_grace: Duration::from_secs(2),
        kill_grace: Duration::from_secs(2),
    }
}

/// Path of the log fake kernels append their pid to.
pub fn spawn_log(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join("spawns.log")
}

/// How many fake kernels have been launched in `runtime_dir`.
pub fn spawn_count(runtime_dir: &Path) -> usize {
    std::fs::read_to_string(spawn_log(runtime_dir))
        .map(|log| log.lines().filter(|line| !line.trim().is_empty()).count())
        .unwrap_or(0)
}
