//! tinybatch CLI - shrink every image of a directory.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tinybatch::compressor::{Compressor, HttpCompressor};
use tinybatch::config::{BatchConfig, CliArgs};
use tinybatch::decorator::{BrowserDisguise, RequestDecorator};
use tinybatch::progress::{ConsoleProgress, ProgressLog};
use tinybatch::run_batch;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  let args = CliArgs::parse();

  if let Err(e) = run(args) {
    eprintln!("Error: {:#}", e);
    std::process::exit(1);
  }
}

fn run(args: CliArgs) -> anyhow::Result<()> {
  let config = BatchConfig::from_cli(&args)?;

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to start the async runtime")?;

  let decorator: Arc<dyn RequestDecorator> = Arc::new(BrowserDisguise);
  let compressor: Arc<dyn Compressor> =
    Arc::new(HttpCompressor::new(config.endpoints.clone(), decorator).context("failed to set up the HTTP client")?);
  let progress: Arc<dyn ProgressLog> = Arc::new(ConsoleProgress);

  let summary = runtime.block_on(run_batch(&config, compressor, progress))?;

  info!(
    discovered = summary.discovered,
    compressed = summary.compressed,
    failed = summary.failed,
    bytes_in = summary.bytes_in,
    bytes_out = summary.bytes_out,
    "Batch finished. Output in {}",
    config.output_dir.display()
  );
  Ok(())
}
