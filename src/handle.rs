use crate::error::PoolError;
use crate::task::TaskLabel;
use fibre::oneshot;
use tracing;

/// A handle to a task submitted to a `TransferPool`.
///
/// The only thing a caller can do with a submitted task is wait for it: once
/// dispatched, a task always runs to completion.
#[derive(Debug)]
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) label: TaskLabel,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<R, PoolError>>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  /// Awaits the completion of the task and returns its result of type `R`.
  ///
  /// # Errors
  /// Returns `PoolError::TaskPanicked` if the task panicked during execution.
  /// Returns `PoolError::PoolShuttingDown` if the pool dropped the task before dispatching it.
  /// Returns `PoolError::ResultChannelError` if the result channel broke without a value.
  /// Returns `PoolError::ResultUnavailable` if the result was already taken.
  pub async fn await_result(mut self) -> Result<R, PoolError> {
    match self.result_receiver.take() {
      Some(rx) => match rx.recv().await {
        Ok(task_outcome_result) => task_outcome_result,
        Err(oneshot_recv_error) => {
          tracing::warn!(task_id = %self.task_id, label = %self.label, "Result channel receive error: {}", oneshot_recv_error);
          Err(PoolError::ResultChannelError(format!(
            "Task (id: {}, label: {}) result channel unexpectedly closed: {}",
            self.task_id, self.label, oneshot_recv_error
          )))
        }
      },
      None => Err(PoolError::ResultUnavailable),
    }
  }
}
