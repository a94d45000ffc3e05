//! Kernel and execution configuration.
//!
//! Timeouts are plain values so callers (the CLI, tests) can tighten or relax
//! them without touching the code paths that enforce them.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the interpreter used to launch kernels.
pub const PYTHON_ENV_VAR: &str = "IPUPPY_PYTHON";

/// Placeholder substituted with the connection file path in kernel argv.
pub const CONNECTION_FILE_PLACEHOLDER: &str = "{connection_file}";

/// Identifier of the single kernel a manager owns.
pub const DEFAULT_KERNEL_ID: &str = "global-kernel";

/// How to launch and tear down the kernel process.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Identifier reported for the kernel.
    pub kernel_id: String,
    /// Directory holding connection files.
    pub runtime_dir: PathBuf,
    /// Program and arguments. Any argument containing
    /// [`CONNECTION_FILE_PLACEHOLDER`] has it replaced by the connection file path.
    pub argv: Vec<String>,
    /// How long to wait for the connection file.
    pub startup_timeout: Duration,
    /// Polling interval for startup and shutdown waits.
    pub poll_interval: Duration,
    /// How long to wait after SIGINT before escalating.
    pub interrupt_grace: Duration,
    /// How long to wait for exit after a forceful kill.
    pub kill_grace: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel_id: DEFAULT_KERNEL_ID.to_string(),
            runtime_dir: default_runtime_dir(),
            argv: ipykernel_argv(&find_python()),
            startup_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            interrupt_grace: Duration::from_secs(5),
            kill_grace: Duration::from_secs(5),
        }
    }
}

impl KernelConfig {
    /// Use the given interpreter with the standard ipykernel arguments.
    pub fn with_python(mut self, python: impl AsRef<Path>) -> Self {
        self.argv = ipykernel_argv(python.as_ref());
        self
    }

    /// Path of the connection file for this kernel.
    pub fn connection_file(&self) -> PathBuf {
        self.runtime_dir.join(format!("kernel-{}.json", self.kernel_id))
    }

    /// Argv with the connection file placeholder expanded.
    pub fn resolved_argv(&self, connection_file: &Path) -> Vec<String> {
        let path = connection_file.to_string_lossy();
        self.argv
            .iter()
            .map(|arg| arg.replace(CONNECTION_FILE_PLACEHOLDER, &path))
            .collect()
    }
}

/// Bounds applied while talking to a running kernel.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Wait for any single iopub message before polling again.
    pub message_timeout: Duration,
    /// Upper bound for one whole execution.
    pub overall_timeout: Duration,
    /// Wait for a `complete_reply`.
    pub completion_timeout: Duration,
    /// Wait for a fresh channel to see kernel traffic. Covers a kernel still
    /// busy with another cell, since probes queue behind it.
    pub ready_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(1),
            overall_timeout: Duration::from_secs(30),
            completion_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Standard ipykernel launch arguments with inline plotting.
pub fn ipykernel_argv(python: &Path) -> Vec<String> {
    vec![
        python.to_string_lossy().to_string(),
        "-m".to_string(),
        "ipykernel".to_string(),
        format!("--ConnectionFileMixin.connection_file={}", CONNECTION_FILE_PLACEHOLDER),
        "--matplotlib=inline".to_string(),
    ]
}

/// Locate a Python interpreter.
///
/// Looks in the following order:
/// 1. `IPUPPY_PYTHON` environment variable
/// 2. `python3` on PATH
/// 3. `python` on PATH
///
/// Falls back to the bare name `python` so the spawn error names it.
pub fn find_python() -> PathBuf {
    if let Ok(path) = std::env::var(PYTHON_ENV_VAR)
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }

    for name in ["python3", "python"] {
        if let Ok(path) = which::which(name) {
            return path;
        }
    }

    PathBuf::from("python")
}

/// Directory for connection files.
///
/// `$XDG_RUNTIME_DIR/ipuppy` when available, then the local data directory,
/// then `./kernels`.
pub fn default_runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .map(|dir| dir.join("ipuppy"))
        .or_else(|| dirs::data_local_dir().map(|dir| dir.join("ipuppy").join("runtime")))
        .unwrap_or_else(|| PathBuf::from("kernels"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_execution_bounds() {
        let config = ExecutionConfig::default();
        assert_eq!(config.message_timeout, Duration::from_secs(1));
        assert_eq!(config.overall_timeout, Duration::from_secs(30));
        assert_eq!(config.completion_timeout, Duration::from_secs(10));
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_connection_file_named_after_kernel() {
        let config = KernelConfig {
            runtime_dir: PathBuf::from("/tmp/rt"),
            ..KernelConfig::default()
        };
        assert_eq!(
            config.connection_file(),
            PathBuf::from("/tmp/rt/kernel-global-kernel.json")
        );
    }

    #[test]
    fn test_resolved_argv_expands_placeholder() {
        let config = KernelConfig::default().with_python("/usr/bin/python3");
        let argv = config.resolved_argv(Path::new("/tmp/k.json"));
        assert_eq!(argv[0], "/usr/bin/python3");
        assert_eq!(argv[1..3], ["-m", "ipykernel"]);
        assert_eq!(argv[3], "--ConnectionFileMixin.connection_file=/tmp/k.json");
        assert_eq!(argv[4], "--matplotlib=inline");
    }
}
