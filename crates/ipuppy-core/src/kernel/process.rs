//! A spawned kernel process and its teardown.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::KernelConfig;
use crate::connection::ConnectionInfo;
use crate::error::{Error, Result};
use crate::wait;

/// Number of stderr lines kept for startup diagnostics.
const STDERR_TAIL_LINES: usize = 200;

/// How long to wait for stderr to drain after the process exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Rolling buffer of the most recent stderr lines.
#[derive(Clone, Default)]
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    fn snapshot(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// Forward kernel stderr to tracing and keep a tail of it.
fn spawn_stderr_reader(stderr: ChildStderr, kernel_id: String) -> (StderrTail, JoinHandle<()>) {
    let tail = StderrTail::default();
    let sink = tail.clone();

    let task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!("kernel {} stderr: {}", kernel_id, line);
            sink.push(line);
        }
    });

    (tail, task)
}

/// Outcome of a teardown. Issues are diagnostics only.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// The process had already exited before any signal was sent.
    pub already_exited: bool,
    /// The interrupt grace period elapsed and the process was killed.
    pub forced: bool,
    /// Steps that failed, in order.
    pub issues: Vec<String>,
}

impl TeardownReport {
    /// Whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// The issues as an error value, for logging.
    pub fn into_error(self) -> Option<Error> {
        (!self.issues.is_empty()).then(|| Error::TeardownPartialFailure(self.issues))
    }
}

/// The live interpreter process owned by a `KernelManager`.
pub struct KernelProcess {
    child: Child,
    pid: Option<u32>,
    connection: Arc<ConnectionInfo>,
    connection_file: PathBuf,
    started_at: DateTime<Utc>,
    stderr_task: JoinHandle<()>,
}

impl KernelProcess {
    /// Spawn the interpreter and wait for its connection file.
    ///
    /// On failure the process is killed and the connection file removed.
    pub(crate) async fn launch(config: &KernelConfig) -> Result<Self> {
        let connection_file = config.connection_file();
        std::fs::create_dir_all(&config.runtime_dir)?;
        remove_if_present(&connection_file)?;

        let argv = config.resolved_argv(&connection_file);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Protocol("kernel command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Protocol("failed to capture kernel stderr".to_string()))?;
        let (tail, mut stderr_task) = spawn_stderr_reader(stderr, config.kernel_id.clone());

        tracing::debug!("Spawned kernel process {:?}: {}", pid, argv.join(" "));

        let outcome = wait::poll_until(config.startup_timeout, config.poll_interval, || {
            match child.try_wait() {
                Ok(Some(status)) => return Some(Err(status.to_string())),
                Ok(None) => {}
                Err(e) => return Some(Err(e.to_string())),
            }
            // A file that is still being written fails to parse; poll again.
            ConnectionInfo::from_file(&connection_file).ok().map(Ok)
        })
        .await;

        match outcome {
            Ok(Ok(info)) => Ok(Self {
                child,
                pid,
                connection: Arc::new(info),
                connection_file,
                started_at: Utc::now(),
                stderr_task,
            }),
            Ok(Err(status)) => {
                let _ = wait::until_deadline(Instant::now() + STDERR_DRAIN_TIMEOUT, &mut stderr_task).await;
                let _ = remove_if_present(&connection_file);
                Err(Error::StartupCrash {
                    status,
                    stderr: tail.snapshot(),
                })
            }
            Err(elapsed) => {
                let _ = child.start_kill();
                let _ = wait::until_deadline(Instant::now() + config.kill_grace, child.wait()).await;
                stderr_task.abort();
                let _ = remove_if_present(&connection_file);
                Err(Error::StartupTimeout {
                    path: connection_file,
                    waited: elapsed.waited,
                })
            }
        }
    }

    /// OS process id, if the process has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Connection info read at startup.
    pub fn connection(&self) -> &Arc<ConnectionInfo> {
        &self.connection
    }

    /// Path of the connection file.
    pub fn connection_file(&self) -> &Path {
        &self.connection_file
    }

    /// When startup completed.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Liveness probe. Never blocks.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn interrupt(&self) -> std::io::Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| std::io::Error::other("process already reaped"))?;
        // SAFETY: plain signal delivery to a pid we spawned.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "SIGINT is not available on this platform",
        ))
    }

    /// Stop the process and remove its connection file.
    ///
    /// Steps: interrupt, wait for exit, kill, wait again, remove the file.
    /// A failing step is recorded and the remaining steps still run.
    pub(crate) async fn teardown(mut self, config: &KernelConfig) -> TeardownReport {
        let mut report = TeardownReport::default();

        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!("Kernel process already terminated ({})", status);
                report.already_exited = true;
            }
            Ok(None) => self.signal_and_wait(config, &mut report).await,
            Err(e) => report.issues.push(format!("failed to query process state: {}", e)),
        }

        match remove_if_present(&self.connection_file) {
            Ok(true) => tracing::info!("Removed connection file {}", self.connection_file.display()),
            Ok(false) => {}
            Err(e) => report
                .issues
                .push(format!("failed to remove connection file: {}", e)),
        }

        self.stderr_task.abort();
        report
    }

    async fn signal_and_wait(&mut self, config: &KernelConfig, report: &mut TeardownReport) {
        let interrupted = match self.interrupt() {
            Ok(()) => {
                tracing::info!("Sent SIGINT to kernel process {:?}", self.pid);
                true
            }
            Err(e) => {
                report.issues.push(format!("failed to send SIGINT: {}", e));
                false
            }
        };

        if interrupted {
            let start = Instant::now();
            let child = &mut self.child;
            let exited = wait::poll_until(config.interrupt_grace, config.poll_interval, || {
                matches!(child.try_wait(), Ok(Some(_))).then_some(())
            })
            .await;
            if exited.is_ok() {
                tracing::info!("Kernel terminated gracefully after {:.1?}", start.elapsed());
                return;
            }
        }

        tracing::warn!("Force killing kernel process {:?}", self.pid);
        report.forced = true;
        if let Err(e) = self.child.start_kill() {
            report.issues.push(format!("failed to kill process: {}", e));
        }
        match wait::until_deadline(Instant::now() + config.kill_grace, self.child.wait()).await {
            Ok(Ok(status)) => tracing::info!("Kernel force killed ({})", status),
            Ok(Err(e)) => report.issues.push(format!("failed to reap process: {}", e)),
            Err(elapsed) => report.issues.push(format!(
                "process did not exit within {:?} of kill",
                elapsed.waited
            )),
        }
    }

    /// Best-effort synchronous cleanup for when no runtime is available.
    pub(crate) fn abandon(mut self) {
        let _ = self.child.start_kill();
        let _ = remove_if_present(&self.connection_file);
        self.stderr_task.abort();
    }
}

/// Remove a file, treating "not found" as success. Returns whether it existed.
fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
