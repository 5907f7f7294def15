//! One pass over one directory.

use crate::compressor::Compressor;
use crate::config::BatchConfig;
use crate::error::{BatchError, JobError};
use crate::job::{build_job, JobContext, JobOutcome};
use crate::manager::{ShutdownMode, TransferPool};
use crate::progress::ProgressLog;
use crate::scanner::list_images;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, info, warn};

const POOL_NAME: &str = "tinybatch";

/// Totals over a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
  /// Eligible files found, each of them dispatched exactly once.
  pub discovered: usize,
  pub compressed: usize,
  pub failed: usize,
  pub bytes_in: u64,
  pub bytes_out: u64,
}

/// Compresses every eligible image of `config.working_dir`.
///
/// Only an unreadable working directory or an output directory that cannot be
/// created is an error; individual files fail on their own and are counted in
/// the summary.
pub async fn run_batch(
  config: &BatchConfig,
  compressor: Arc<dyn Compressor>,
  progress: Arc<dyn ProgressLog>,
) -> Result<BatchSummary, BatchError> {
  let files = list_images(&config.working_dir, &config.filter)?;
  info!(dir = %config.working_dir.display(), count = files.len(), "Found images to compress.");

  // Created once, before any job can write into it.
  tokio::fs::create_dir_all(&config.output_dir)
    .await
    .map_err(|source| BatchError::OutputDir {
      path: config.output_dir.clone(),
      source,
    })?;

  let mut summary = BatchSummary {
    discovered: files.len(),
    ..BatchSummary::default()
  };
  if files.is_empty() {
    return Ok(summary);
  }

  let ctx = Arc::new(JobContext {
    working_dir: config.working_dir.clone(),
    output_dir: config.output_dir.clone(),
    compressor,
    progress: progress.clone(),
  });

  let total = files.len();
  let pool = TransferPool::<JobOutcome>::new(config.concurrency, total, TokioHandle::current(), POOL_NAME);
  let finished = Arc::new(AtomicUsize::new(0));
  {
    let finished = finished.clone();
    pool.on_completion(move |completion| {
      let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
      debug!(file = %completion.label, status = ?completion.status, "{}/{} files done.", done, total);
    });
  }

  let mut handles = Vec::with_capacity(total);
  for file_name in files {
    let job = build_job(ctx.clone(), file_name.clone());
    let handle = pool.submit(file_name.clone(), job).await;
    handles.push((file_name, handle));
  }

  for (file_name, handle) in handles {
    let outcome = match handle {
      Ok(handle) => handle.await_result().await,
      Err(submit_error) => Err(submit_error),
    };
    match outcome {
      Ok(Ok(report)) => {
        summary.compressed += 1;
        summary.bytes_in += report.input_size;
        summary.bytes_out += report.output_size;
      }
      // Already reported by the job itself.
      Ok(Err(_)) => summary.failed += 1,
      Err(pool_error) => {
        summary.failed += 1;
        progress.failure(&file_name, &JobError::Aborted(pool_error.to_string()));
      }
    }
  }

  if let Err(e) = pool.shutdown(ShutdownMode::Drain).await {
    warn!("Pool shutdown reported an error: {}", e);
  }
  Ok(summary)
}
