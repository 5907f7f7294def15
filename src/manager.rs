use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskCompletionStatus};
use crate::task::{ManagedTaskInternal, TaskLabel, TaskToExecute};
use crate::task_queue::{QueueConsumer, QueueProducer, TaskQueue};

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use fibre::oneshot;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines how the pool should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stops accepting new tasks, dispatches everything already queued and
  /// waits until every task has completed.
  Drain,
  /// Stops accepting new tasks and waits for the active ones.
  /// Queued tasks that haven't started are dropped; their handles resolve
  /// to an error.
  Graceful,
}

/// A pool running at most `concurrency_limit` futures at once.
///
/// Tasks are dispatched in submission order by a single dispatcher loop that
/// holds a semaphore permit per running task. A task that panics is caught and
/// reported through its handle; it never takes the pool or its siblings down.
pub struct TransferPool<R: Send + 'static> {
  pool_name: Arc<String>,
  concurrency_limit: usize,
  semaphore: Arc<Semaphore>,
  task_queue_tx: QueueProducer<R>,
  active_task_info: Arc<DashMap<u64, TaskLabel>>,
  shutdown_token: CancellationToken,
  notifier: Arc<CompletionNotifier>,
  worker_join_handle_internal: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Send + 'static> TransferPool<R> {
  pub fn new(concurrency_limit: usize, queue_capacity: usize, tokio_handle: TokioHandle, pool_name: &str) -> Arc<Self> {
    let concurrency_limit = concurrency_limit.max(1);
    let (producer, consumer) = TaskQueue::new(queue_capacity).split();
    let pool_name = Arc::new(pool_name.to_string());
    let semaphore = Arc::new(Semaphore::new(concurrency_limit));
    let active_task_info = Arc::new(DashMap::new());
    let shutdown_token = CancellationToken::new();
    let notifier = CompletionNotifier::new(tokio_handle.clone(), pool_name.clone());

    let worker_loop_join_handle = tokio_handle.spawn(
      Self::run_worker_loop(
        pool_name.clone(),
        semaphore.clone(),
        consumer,
        tokio_handle.clone(),
        active_task_info.clone(),
        shutdown_token.clone(),
        notifier.clone(),
      )
      .instrument(info_span!("transfer_pool_worker_loop", name = %*pool_name)),
    );

    Arc::new(Self {
      pool_name,
      concurrency_limit,
      semaphore,
      task_queue_tx: producer,
      active_task_info,
      shutdown_token,
      notifier,
      worker_join_handle_internal: Mutex::new(Some(worker_loop_join_handle)),
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn concurrency_limit(&self) -> usize {
    self.concurrency_limit
  }

  /// Number of tasks currently running.
  pub fn active_task_count(&self) -> usize {
    self.active_task_info.len()
  }

  /// Labels of the tasks currently running, in no particular order.
  pub fn active_labels(&self) -> Vec<TaskLabel> {
    self.active_task_info.iter().map(|entry| entry.value().clone()).collect()
  }

  /// Returns the current number of tasks in the pending queue.
  pub fn queued_task_count(&self) -> usize {
    self.task_queue_tx.len()
  }

  /// Registers a handler called once per finished task, in completion order.
  ///
  /// Only tasks dispatched after registration are reported.
  pub fn on_completion(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.notifier.add_handler(handler);
  }

  /// Queues a task. Waits if the queue is at capacity.
  pub async fn submit(&self, label: impl Into<TaskLabel>, task_future: TaskToExecute<R>) -> Result<TaskHandle<R>, PoolError> {
    let label = label.into();
    if self.shutdown_token.is_cancelled() || self.task_queue_tx.is_closed() {
      warn!(pool_name = %self.pool_name, %label, "Submit: Attempted to submit task to a pool that is shutting down or closed.");
      return Err(PoolError::PoolShuttingDown);
    }

    let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let (result_tx, result_rx) = oneshot::oneshot::<Result<R, PoolError>>();

    let managed_task_internal = ManagedTaskInternal {
      task_id,
      label: label.clone(),
      future: task_future,
      result_sender: Some(result_tx),
    };

    debug!(pool_name = %self.pool_name, %task_id, %label, "Submitting task to queue.");

    match self.task_queue_tx.send(managed_task_internal, &self.shutdown_token).await {
      Ok(()) => Ok(TaskHandle {
        task_id,
        label,
        result_receiver: Some(result_rx),
      }),
      Err(send_error) => {
        error!(pool_name = %self.pool_name, %task_id, %label, "Submit: Failed to queue task: {}", send_error);
        Err(send_error)
      }
    }
  }

  /// Shuts the pool down and waits for it.
  ///
  /// Returns once the dispatcher has stopped, no task is running and every
  /// completion handler has seen its events.
  pub async fn shutdown(self: Arc<Self>, mode: ShutdownMode) -> Result<(), PoolError> {
    info!(pool_name = %self.pool_name, "Initiating pool shutdown (mode: {:?}).", mode);
    self.task_queue_tx.close();
    if mode == ShutdownMode::Graceful {
      self.shutdown_token.cancel();
    }

    let handle_to_await = self.worker_join_handle_internal.lock().take();
    if let Some(handle) = handle_to_await {
      trace!(pool_name = %self.pool_name, "Waiting for worker loop to join.");
      if let Err(join_error) = handle.await {
        error!(pool_name = %self.pool_name, "Error joining worker loop during shutdown: {:?}", join_error);
      }
    } else {
      trace!(pool_name = %self.pool_name, "Worker join handle already taken by a concurrent shutdown call.");
    }

    // Every running task holds a permit; owning all of them means none is left.
    let all_permits = self
      .semaphore
      .acquire_many(self.concurrency_limit as u32)
      .await
      .map_err(|_| PoolError::SemaphoreClosed)?;
    drop(all_permits);
    self.shutdown_token.cancel();

    self.notifier.close();
    self.notifier.await_shutdown().await;

    info!(pool_name = %self.pool_name, "Pool shutdown completed.");
    Ok(())
  }

  async fn run_worker_loop(
    pool_name: Arc<String>,
    semaphore: Arc<Semaphore>,
    task_queue_rx: QueueConsumer<R>,
    tasks_tokio_handle: TokioHandle,
    active_task_info_map: Arc<DashMap<u64, TaskLabel>>,
    shutdown_token: CancellationToken,
    notifier: Arc<CompletionNotifier>,
  ) {
    info!(name = %*pool_name, "Worker loop started.");

    loop {
      let permit: OwnedSemaphorePermit = tokio::select! {
        biased;
        _ = shutdown_token.cancelled() => {
          info!(name = %*pool_name, "Shutdown signal received. Worker loop terminating.");
          break;
        }
        acquired = semaphore.clone().acquire_owned() => match acquired {
          Ok(p) => p,
          Err(_) => {
            error!(name = %*pool_name, "Semaphore closed. Worker loop exiting.");
            break;
          }
        }
      };
      trace!(name = %*pool_name, "Acquired semaphore permit. Available: {}", semaphore.available_permits());

      let managed_task = tokio::select! {
        biased;
        _ = shutdown_token.cancelled() => {
          info!(name = %*pool_name, "Shutdown signal received while holding a permit. Releasing it.");
          break;
        }
        recv_result = task_queue_rx.recv() => match recv_result {
          Ok(task) => task,
          Err(_) => {
            info!(name = %*pool_name, "Task queue closed and empty.");
            break;
          }
        }
      };

      Self::dispatch(
        &pool_name,
        &tasks_tokio_handle,
        &active_task_info_map,
        &notifier,
        managed_task,
        permit,
      );
    }

    if shutdown_token.is_cancelled() {
      // Anything still queued was never started; tell its owner.
      while let Ok(dropped) = task_queue_rx.recv().await {
        debug!(name = %*pool_name, task_id = dropped.task_id, label = %dropped.label, "Dropping queued task on shutdown.");
        if let Some(tx) = dropped.result_sender {
          let _ = tx.send(Err(PoolError::PoolShuttingDown));
        }
      }
    }

    info!(
      name = %*pool_name,
      "Worker loop stopped. Tasks still running: {}",
      active_task_info_map.len()
    );
  }

  fn dispatch(
    pool_name: &Arc<String>,
    tokio_handle: &TokioHandle,
    active_task_info_map: &Arc<DashMap<u64, TaskLabel>>,
    notifier: &Arc<CompletionNotifier>,
    managed_task: ManagedTaskInternal<R>,
    permit: OwnedSemaphorePermit,
  ) {
    let ManagedTaskInternal {
      task_id,
      label,
      future,
      result_sender,
    } = managed_task;

    active_task_info_map.insert(task_id, label.clone());
    debug!(name = %**pool_name, %task_id, %label, "Dequeued task. Spawning with permit.");

    let pool_name = pool_name.clone();
    let active_task_info_map = active_task_info_map.clone();
    let completion_tx = notifier.sender();
    let span = info_span!("managed_task", pool_name = %*pool_name, %task_id, %label);

    tokio_handle.spawn(
      async move {
        // Released when this block ends, after the bookkeeping below.
        let _permit_guard = permit;

        let execution_outcome: Result<R, PoolError> = match AssertUnwindSafe(future).catch_unwind().await {
          Ok(actual_result) => {
            trace!(pool_name = %*pool_name, %task_id, "Task executed.");
            Ok(actual_result)
          }
          Err(_panic_payload) => {
            error!(pool_name = %*pool_name, %task_id, %label, "Task panicked during execution.");
            Err(PoolError::TaskPanicked)
          }
        };

        active_task_info_map.remove(&task_id);
        let status = TaskCompletionStatus::from(&execution_outcome);

        if let Some(tx_result) = result_sender {
          if tx_result.send(execution_outcome).is_err() {
            warn!(pool_name = %*pool_name, %task_id, "Result receiver for task was dropped. Task outcome may have been lost.");
          }
        }

        if let Some(completion_tx) = completion_tx {
          let event = TaskCompletionInfo {
            task_id,
            pool_name: pool_name.clone(),
            label,
            status,
            completion_time: SystemTime::now(),
          };
          if completion_tx.send(event).await.is_err() {
            trace!(pool_name = %*pool_name, %task_id, "Notification worker gone; completion event dropped.");
          }
        }
      }
      .instrument(span),
    );
  }
}

impl<R: Send + 'static> Drop for TransferPool<R> {
  fn drop(&mut self) {
    if !self.shutdown_token.is_cancelled() {
      info!(
        pool_name = %*self.pool_name,
        "TransferPool dropped without shutdown. Signalling worker to stop and closing queue."
      );
      self.shutdown_token.cancel();
      self.task_queue_tx.close();
      self.notifier.close();
    } else {
      trace!(pool_name = %*self.pool_name, "Drop: Shutdown already completed.");
    }
  }
}

/// Runs `tasks` with at most `limit` in flight and returns every outcome in
/// submission order.
///
/// An empty list returns immediately without starting a pool. A limit at or
/// above the number of tasks dispatches them all at once.
pub async fn run_all<R: Send + 'static>(tasks: Vec<TaskToExecute<R>>, limit: usize) -> Vec<Result<R, PoolError>> {
  if tasks.is_empty() {
    return Vec::new();
  }

  let pool = TransferPool::<R>::new(limit, tasks.len(), TokioHandle::current(), "run_all");
  let mut handles = Vec::with_capacity(tasks.len());
  for (index, task) in tasks.into_iter().enumerate() {
    handles.push(pool.submit(format!("task-{}", index), task).await);
  }

  let mut results = Vec::with_capacity(handles.len());
  for handle in handles {
    results.push(match handle {
      Ok(handle) => handle.await_result().await,
      Err(submit_error) => Err(submit_error),
    });
  }

  if let Err(e) = pool.shutdown(ShutdownMode::Drain).await {
    warn!("run_all: pool shutdown reported {}", e);
  }
  results
}
