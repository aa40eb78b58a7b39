//! CLI subcommand handlers

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use compositor::{
    CompositionRequest, Compositor, CompositorConfig, FfmpegEngine, MediaProber, Operation,
};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::output::OutputHandler;

/// Run one operation and report the outcome.
pub async fn compose(
    config: &CompositorConfig,
    operation: Operation,
    output_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let request = CompositionRequest {
        operation,
        output_path,
    };
    run(config, request, json).await
}

/// Run a JSON [`CompositionRequest`] read from a file or stdin (`-`).
/// `--output` overrides any `outputPath` in the request.
pub async fn run_request(
    config: &CompositorConfig,
    path: &Path,
    output_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let content = if path == Path::new("-") {
        let mut buffer = String::new();
        tokio::io::stdin().read_to_string(&mut buffer).await?;
        buffer
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request {}", path.display()))?
    };

    let mut request: CompositionRequest =
        serde_json::from_str(&content).context("Failed to parse composition request")?;
    debug!(operation = request.operation.name(), source = %path.display(), "Loaded request");
    if output_path.is_some() {
        request.output_path = output_path;
    }
    run(config, request, json).await
}

async fn run(config: &CompositorConfig, request: CompositionRequest, json: bool) -> Result<()> {
    let output = OutputHandler::new(!json);
    let operation = request.operation.name();

    let (tx, mut rx) = mpsc::channel(64);
    let compositor = Compositor::new(config)?.with_progress(tx);
    debug!(output_dir = %compositor.output_dir().display(), "Compositor ready");

    let progress_output = output.clone();
    let reporter = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            progress_output.print_progress(&update);
        }
    });

    output.print_header(&format!("Composing {}", operation));
    let result = compositor.compose(request).await;
    // Closing the last sender ends the reporter loop.
    drop(compositor);
    let _ = reporter.await;
    output.finish_progress();

    match result {
        Ok(success) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&success)?);
            } else {
                output.print_success(&format!("Wrote {}", success.output_path.display()));
            }
            Ok(())
        }
        Err(failure) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&failure)?);
            } else {
                output.print_error(&failure.message);
                if let Some(stderr) = failure.stderr.as_deref() {
                    output.print_stderr_tail(stderr);
                }
            }
            anyhow::bail!("{} failed", operation)
        }
    }
}

/// Print the descriptor the prober builds for a file.
pub async fn probe(config: &CompositorConfig, input: &Path) -> Result<()> {
    let engine = Arc::new(FfmpegEngine::new(&config.engine)?);
    let descriptor = MediaProber::new(engine).probe(input).await;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

pub fn show_config(config: &CompositorConfig) -> Result<()> {
    let output = OutputHandler::new(true);
    output.print_header("Configuration");
    output.print_info(&format!(
        "Config file: {}",
        CompositorConfig::config_path().display()
    ));
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
