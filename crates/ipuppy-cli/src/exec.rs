//! Exec command implementation for iPuppy CLI.
//!
//! Starts a kernel, runs one snippet, prints its outputs and stops the kernel.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ipuppy_core::{CodeExecutor, ExecutionConfig, KernelConfig, KernelManager, OutputEvent};

use crate::colors;

/// Code from the argument, a file, or stdin.
pub fn read_source(code: Option<String>, file: Option<&Path>) -> anyhow::Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let mut source = String::new();
    std::io::stdin()
        .read_to_string(&mut source)
        .context("Failed to read code from stdin")?;
    Ok(source)
}

/// Run `source` on a fresh kernel.
pub async fn execute(
    source: &str,
    kernel: KernelConfig,
    execution: ExecutionConfig,
    json: bool,
) -> anyhow::Result<()> {
    let kernels = Arc::new(KernelManager::new(kernel));
    kernels.ensure_running().await?;

    let executor = CodeExecutor::new(kernels.clone(), execution);
    let result = executor.execute(source).await;
    kernels.stop().await;
    let outputs = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        for output in &outputs {
            render(output);
        }
    }

    if let Some(OutputEvent::Error { ename, evalue, .. }) =
        outputs.iter().find(|output| matches!(output, OutputEvent::Error { .. }))
    {
        anyhow::bail!("{}: {}", ename, evalue);
    }

    Ok(())
}

fn render(output: &OutputEvent) {
    match output {
        OutputEvent::Stream { name, text } if name == "stderr" => eprint!("{}", text),
        OutputEvent::Stream { text, .. } => print!("{}", text),
        OutputEvent::ExecuteResult {
            execution_count,
            text,
            ..
        } => {
            let label = execution_count.map(|n| format!("Out[{}]: ", n)).unwrap_or_default();
            println!("{}{}{}{}", colors::DIM, label, colors::RESET, text);
        }
        OutputEvent::DisplayData { text, .. } => println!("{}", text),
        OutputEvent::Error { traceback, .. } => {
            for line in traceback {
                eprintln!("{}{}{}", colors::RED, line, colors::RESET);
            }
        }
        OutputEvent::StatusIdle => {}
    }
}
