//! Lifecycle of the single kernel process.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::KernelConfig;
use crate::connection::ConnectionInfo;
use crate::error::Result;

use super::process::{KernelProcess, TeardownReport};

/// Identifier of a managed kernel.
pub type KernelId = String;

/// Lifecycle state of the managed kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    /// No process, or the recorded process has exited.
    NoKernel,
    /// Spawned, waiting for the connection file.
    Starting,
    /// Alive and accepting requests.
    Running,
    /// Teardown in progress.
    Stopping,
}

/// Summary of a running kernel for listings.
#[derive(Debug, Clone, Serialize)]
pub struct KernelSummary {
    pub kernel_id: KernelId,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub connection_file: String,
}

struct Slot {
    process: Option<KernelProcess>,
    state: KernelState,
}

/// Owns at most one kernel process.
///
/// `start`, `stop`, `restart` and `ensure_running` are serialized by an async
/// lifecycle lock, so only one spawn or teardown is ever in flight. Readers
/// (`is_alive`, `info`, `state`, `list`) only take the short synchronous slot
/// lock and never wait behind a startup.
pub struct KernelManager {
    config: KernelConfig,
    lifecycle: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
}

impl KernelManager {
    /// Create a manager. No process is started.
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            lifecycle: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot {
                process: None,
                state: KernelState::NoKernel,
            }),
        }
    }

    /// The kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Identifier of the managed kernel.
    pub fn kernel_id(&self) -> KernelId {
        self.config.kernel_id.clone()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        // A panic while holding the slot lock leaves plain data behind; keep using it.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the kernel unless a live one is already recorded.
    ///
    /// A recorded process that has exited is torn down first.
    pub async fn ensure_running(&self) -> Result<KernelId> {
        let _guard = self.lifecycle.lock().await;
        if self.is_alive() {
            return Ok(self.kernel_id());
        }
        self.start_locked().await
    }

    /// Start a fresh kernel, replacing any recorded one.
    pub async fn start(&self) -> Result<KernelId> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<KernelId> {
        if let Some(report) = self.stop_locked().await {
            tracing::debug!("Replaced previous kernel record (clean: {})", report.is_clean());
        }

        self.slot().state = KernelState::Starting;
        tracing::info!("Starting kernel {}", self.config.kernel_id);

        match KernelProcess::launch(&self.config).await {
            Ok(process) => {
                tracing::info!(
                    "Started kernel {} (pid {:?}, connection file {})",
                    self.config.kernel_id,
                    process.pid(),
                    process.connection_file().display()
                );
                let mut slot = self.slot();
                slot.process = Some(process);
                slot.state = KernelState::Running;
                Ok(self.kernel_id())
            }
            Err(e) => {
                tracing::error!("Failed to start kernel {}: {}", self.config.kernel_id, e);
                self.slot().state = KernelState::NoKernel;
                Err(e)
            }
        }
    }

    /// Whether a recorded process exists and has not exited.
    pub fn is_alive(&self) -> bool {
        self.slot()
            .process
            .as_mut()
            .is_some_and(|process| !process.has_exited())
    }

    /// Current lifecycle state. A crashed kernel reports `NoKernel`.
    pub fn state(&self) -> KernelState {
        let mut slot = self.slot();
        let state = slot.state;
        let crashed = state == KernelState::Running
            && slot.process.as_mut().is_some_and(|process| process.has_exited());
        if crashed { KernelState::NoKernel } else { state }
    }

    /// Connection info of the live kernel. Never returns a crashed kernel's data.
    pub fn info(&self) -> Option<Arc<ConnectionInfo>> {
        let mut slot = self.slot();
        let process = slot.process.as_mut()?;
        if process.has_exited() {
            return None;
        }
        Some(process.connection().clone())
    }

    /// Running kernels: zero or one entry.
    pub fn list(&self) -> Vec<KernelSummary> {
        let mut slot = self.slot();
        let Some(process) = slot.process.as_mut() else {
            return Vec::new();
        };
        if process.has_exited() {
            return Vec::new();
        }
        vec![KernelSummary {
            kernel_id: self.config.kernel_id.clone(),
            pid: process.pid(),
            started_at: process.started_at(),
            connection_file: process.connection_file().display().to_string(),
        }]
    }

    /// Stop the kernel. Returns `false` when nothing was recorded.
    ///
    /// Never fails: teardown issues are logged and the record is cleared.
    pub async fn stop(&self) -> bool {
        self.stop_with_report().await.is_some()
    }

    /// Stop the kernel and return what teardown did.
    pub async fn stop_with_report(&self) -> Option<TeardownReport> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Option<TeardownReport> {
        let process = {
            let mut slot = self.slot();
            let process = slot.process.take();
            slot.state = if process.is_some() {
                KernelState::Stopping
            } else {
                KernelState::NoKernel
            };
            process?
        };

        tracing::info!("Stopping kernel {}", self.config.kernel_id);
        let report = process.teardown(&self.config).await;
        self.slot().state = KernelState::NoKernel;

        if let Some(e) = report.clone().into_error() {
            tracing::warn!("Kernel {} stopped with issues: {}", self.config.kernel_id, e);
        } else {
            tracing::info!("Kernel {} stopped", self.config.kernel_id);
        }

        Some(report)
    }

    /// Stop then start. Starts even if teardown reported issues.
    pub async fn restart(&self) -> Result<KernelId> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
        self.start_locked().await
    }
}

impl Drop for KernelManager {
    fn drop(&mut self) {
        // Ensure the kernel does not outlive its manager
        if let Some(process) = self.slot().process.take() {
            process.abandon();
        }
    }
}
