//! Serve command implementation for iPuppy CLI.

use ipuppy_core::{ExecutionConfig, KernelConfig};
use ipuppy_server::ServerConfig;

use crate::colors;

/// Start the notebook server.
pub async fn execute(
    host: String,
    port: u16,
    kernel: KernelConfig,
    execution: ExecutionConfig,
) -> anyhow::Result<()> {
    println!("\n{}iPuppy Server{} - Notebook kernel", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Kernel:{} {}",
        colors::CYAN,
        colors::RESET,
        kernel.argv.join(" ")
    );
    println!(
        "{}  ◆ Runtime dir:{} {}",
        colors::CYAN,
        colors::RESET,
        kernel.runtime_dir.display()
    );

    let config = ServerConfig {
        host,
        port,
        kernel,
        execution,
    };

    println!(
        "{}  ◆ Server:{} http://{}:{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    println!(
        "{}  ◆ WebSocket:{} ws://{}:{}/ws",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    ipuppy_server::serve(config).await?;

    Ok(())
}
