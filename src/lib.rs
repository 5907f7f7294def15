//! Batch image shrinking over a bounded Tokio task pool.
//!
//! Every PNG/JPEG of a directory is uploaded to an online compressor, the
//! result is downloaded into an output subdirectory, and at most N files are
//! in flight at once. A failing file never stops the others.

mod error;
mod handle;
mod manager;
mod notifier;
mod task;
mod task_queue;

pub mod batch;
pub mod compressor;
pub mod config;
pub mod decorator;
pub mod job;
pub mod progress;
pub mod scanner;

pub use batch::{run_batch, BatchSummary};
pub use error::{BatchError, JobError, PoolError};
pub use handle::TaskHandle;
pub use manager::{run_all, ShutdownMode, TransferPool};
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use task::{TaskLabel, TaskToExecute};
