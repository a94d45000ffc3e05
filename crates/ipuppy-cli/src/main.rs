//! iPuppy CLI - Python notebooks backed by a Jupyter kernel.

mod colors;
mod exec;
mod serve;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ipuppy_core::{ExecutionConfig, KernelConfig};

#[derive(Parser)]
#[command(name = "ipuppy")]
#[command(about = "Notebook server and runner for a Jupyter kernel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the notebook server
    Serve {
        /// Host address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        #[command(flatten)]
        kernel: KernelArgs,
    },

    /// Run code once on a fresh kernel and print its outputs
    Exec {
        /// Code to run (reads stdin when neither CODE nor --file is given)
        #[arg(conflicts_with = "file")]
        code: Option<String>,

        /// Read code from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print outputs as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        kernel: KernelArgs,
    },
}

/// Kernel launch and execution options shared by all commands.
#[derive(Args)]
struct KernelArgs {
    /// Python interpreter with ipykernel installed [env: IPUPPY_PYTHON]
    #[arg(long)]
    python: Option<PathBuf>,

    /// Directory for kernel connection files
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Seconds to wait for the kernel to start
    #[arg(long, default_value = "10")]
    startup_timeout: u64,

    /// Upper bound in seconds for one execution
    #[arg(long, default_value = "30")]
    timeout: u64,
}

impl KernelArgs {
    fn kernel_config(&self) -> KernelConfig {
        let mut config = KernelConfig {
            startup_timeout: Duration::from_secs(self.startup_timeout),
            ..KernelConfig::default()
        };
        if let Some(python) = &self.python {
            config = config.with_python(python);
        }
        if let Some(dir) = &self.runtime_dir {
            config.runtime_dir = dir.clone();
        }
        config
    }

    fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            overall_timeout: Duration::from_secs(self.timeout),
            ..ExecutionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { host, port, kernel } => {
            serve::execute(host, port, kernel.kernel_config(), kernel.execution_config()).await?;
        }

        Commands::Exec {
            code,
            file,
            json,
            kernel,
        } => {
            let source = exec::read_source(code, file.as_deref())?;
            exec::execute(&source, kernel.kernel_config(), kernel.execution_config(), json).await?;
        }
    }

    Ok(())
}
