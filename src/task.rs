use crate::error::PoolError;

use std::future::Future;
use std::pin::Pin;

use fibre::oneshot;

/// A descriptive label for a task; the batch uses the file name.
pub type TaskLabel = String;

/// The type of future that the pool executes.
/// It must be `Send` and `'static`, and produce a result of type `R`.
/// Futures are lazy, so a boxed future is the deferred unit of work: nothing
/// runs until the pool dispatches it.
pub type TaskToExecute<R> = Pin<Box<dyn Future<Output = R> + Send + 'static>>;

/// Internal representation of a task managed by the pool.
pub(crate) struct ManagedTaskInternal<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) label: TaskLabel,
  pub(crate) future: TaskToExecute<R>,
  pub(crate) result_sender: Option<oneshot::Sender<Result<R, PoolError>>>,
}
