//! The unit of work for one image: upload, download, report.

use crate::compressor::Compressor;
use crate::error::JobError;
use crate::progress::ProgressLog;
use crate::task::TaskToExecute;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// What every job of a batch shares.
pub struct JobContext {
  pub working_dir: PathBuf,
  /// Must exist before the first job runs.
  pub output_dir: PathBuf,
  pub compressor: Arc<dyn Compressor>,
  pub progress: Arc<dyn ProgressLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
  pub file_name: String,
  /// Sizes as reported by the service.
  pub input_size: u64,
  pub output_size: u64,
  /// Bytes actually written to the output file.
  pub bytes_written: u64,
}

impl FileReport {
  pub fn ratio_percent(&self) -> f64 {
    self.output_size as f64 * 100.0 / self.input_size as f64
  }
}

pub type JobOutcome = Result<FileReport, JobError>;

/// Compresses `file_name` from the working directory into the output directory.
///
/// The output file is only created once the service accepted the upload, so a
/// rejected file leaves nothing behind. A failed download may leave a partial
/// file.
pub async fn shrink_file(ctx: &JobContext, file_name: &str) -> JobOutcome {
  let source_path = ctx.working_dir.join(file_name);
  let body = tokio::fs::read(&source_path).await.map_err(|source| JobError::Read {
    path: source_path.clone(),
    source,
  })?;
  debug!(file = %file_name, bytes = body.len(), "Read source image.");

  let shrunk = ctx.compressor.shrink(file_name, body).await?;

  let target_path = ctx.output_dir.join(file_name);
  let write_error = |source: std::io::Error| JobError::Write {
    path: target_path.clone(),
    source,
  };
  let mut target = tokio::fs::File::create(&target_path).await.map_err(write_error)?;
  let bytes_written = ctx.compressor.download(&shrunk.url, &mut target).await?;
  target.flush().await.map_err(write_error)?;

  Ok(FileReport {
    file_name: file_name.to_string(),
    input_size: shrunk.input_size,
    output_size: shrunk.output_size,
    bytes_written,
  })
}

/// Wraps [`shrink_file`] into a pool task that reports its own outcome.
///
/// The outcome is returned as a value; a failing file never fails the task.
pub fn build_job(ctx: Arc<JobContext>, file_name: String) -> TaskToExecute<JobOutcome> {
  Box::pin(async move {
    let outcome = shrink_file(&ctx, &file_name).await;
    match &outcome {
      Ok(report) => ctx.progress.success(report),
      Err(error) => ctx.progress.failure(&file_name, error),
    }
    outcome
  })
}
