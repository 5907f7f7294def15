use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur within the transfer pool itself.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
  #[error("Task result channel error (task might have panicked or the worker dropped it): {0}")]
  ResultChannelError(String),

  #[error("Task result already taken or channel was not available")]
  ResultUnavailable,

  #[error("Pool's internal semaphore was closed unexpectedly")]
  SemaphoreClosed,

  #[error("Pool's internal task queue (sender side) was closed unexpectedly")]
  QueueSendChannelClosed,

  #[error("Submitted task future panicked")]
  TaskPanicked,

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,
}

/// Errors that end the processing of a single file.
///
/// None of these abort the batch; they are reported on the progress log and
/// the remaining files carry on.
#[derive(Error, Debug)]
pub enum JobError {
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("request to compression service failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("compression service rejected the upload: {message}")]
  Service { message: String },

  #[error("malformed response from compression service: {0}")]
  Parse(String),

  #[error("failed to write '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("download of '{url}' failed: {message}")]
  Download { url: String, message: String },

  /// The job never produced an outcome (it panicked or the pool dropped it).
  #[error("job aborted: {0}")]
  Aborted(String),
}

impl From<serde_json::Error> for JobError {
  fn from(err: serde_json::Error) -> Self {
    JobError::Parse(err.to_string())
  }
}

/// Fatal errors: these stop the whole run before any file is processed.
#[derive(Error, Debug)]
pub enum BatchError {
  #[error("cannot read working directory '{path}': {source}")]
  Enumerate {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("cannot create output directory '{path}': {source}")]
  OutputDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid configuration: {0}")]
  Config(String),
}
