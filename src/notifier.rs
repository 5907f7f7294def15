use crate::error::PoolError;
use crate::task::TaskLabel;
use fibre::mpsc::{self, AsyncReceiver, AsyncSender, RecvError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, Instrument};

type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  /// The future ran to completion. Whatever it returned (including an `Err`
  /// value) is in the task's handle.
  Completed,
  Panicked,
  PoolErrorOccurred,
}

impl<R> From<&Result<R, PoolError>> for TaskCompletionStatus {
  fn from(result: &Result<R, PoolError>) -> Self {
    match result {
      Ok(_) => TaskCompletionStatus::Completed,
      Err(PoolError::TaskPanicked) => TaskCompletionStatus::Panicked,
      Err(_) => TaskCompletionStatus::PoolErrorOccurred,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: u64,
  pub pool_name: Arc<String>,
  pub label: TaskLabel,
  pub status: TaskCompletionStatus,
  pub completion_time: SystemTime,
}

// --- CompletionNotifier ---

struct NotifierState {
  rx_for_init: Option<AsyncReceiver<TaskCompletionInfo>>,
  tokio_handle: TokioHandle,
  worker_join_handle: Option<JoinHandle<()>>,
}

/// Fans task completion events out to registered handlers.
///
/// The worker is only started when the first handler is registered; until then
/// `sender()` returns `None` and tasks skip the notification entirely.
pub(crate) struct CompletionNotifier {
  pool_name: Arc<String>,
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  tx: Mutex<Option<AsyncSender<TaskCompletionInfo>>>,
  state: Mutex<NotifierState>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("CompletionNotifier")
      .field("pool_name", &self.pool_name)
      .field("handler_count", &self.handlers.read().len())
      .field("worker_started", &state.rx_for_init.is_none())
      .field("worker_joined", &state.worker_join_handle.is_none())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(tokio_handle: TokioHandle, pool_name: Arc<String>) -> Arc<Self> {
    let (tx, rx) = mpsc::unbounded_async();
    Arc::new(Self {
      pool_name,
      handlers: Arc::new(RwLock::new(Vec::new())),
      tx: Mutex::new(Some(tx)),
      state: Mutex::new(NotifierState {
        rx_for_init: Some(rx),
        tokio_handle,
        worker_join_handle: None,
      }),
    })
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    let total = {
      let mut handlers_guard = self.handlers.write();
      handlers_guard.push(Arc::new(handler));
      handlers_guard.len()
    };
    info!(pool_name = %*self.pool_name, "Notifier: Added completion handler. Total handlers: {}", total);
    self.ensure_worker_started();
  }

  fn ensure_worker_started(&self) {
    let mut state = self.state.lock();
    if let Some(rx) = state.rx_for_init.take() {
      debug!(pool_name = %*self.pool_name, "Starting notification worker.");
      let handlers = self.handlers.clone();
      let join_handle = state.tokio_handle.spawn(
        Self::run_notification_worker_loop(rx, handlers)
          .instrument(info_span!("notification_worker_loop", pool_name = %*self.pool_name)),
      );
      state.worker_join_handle = Some(join_handle);
    }
  }

  /// A sender for one completion event, or `None` when nobody is listening.
  pub(crate) fn sender(&self) -> Option<AsyncSender<TaskCompletionInfo>> {
    if self.state.lock().rx_for_init.is_some() {
      return None;
    }
    self.tx.lock().clone()
  }

  /// Drops the notifier's own sender. The worker exits once every task holding
  /// a sender clone has finished.
  pub(crate) fn close(&self) {
    if self.tx.lock().take().is_some() {
      trace!(pool_name = %*self.pool_name, "Notifier: own sender dropped.");
    }
  }

  async fn run_notification_worker_loop(
    queue_rx: AsyncReceiver<TaskCompletionInfo>,
    handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  ) {
    info!("Notification worker started.");
    loop {
      match queue_rx.recv().await {
        Ok(completion) => {
          // Snapshot so a handler registering another handler cannot deadlock.
          let snapshot: Vec<CompletionHandler> = handlers.read().clone();
          trace!(task_id = completion.task_id, label = %completion.label, "Dispatching completion to {} handlers.", snapshot.len());
          for handler in snapshot {
            let event = completion.clone();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
              error!(
                "A completion handler panicked. Pool: {}, Task ID: {}",
                completion.pool_name, completion.task_id
              );
            }
          }
        }
        Err(RecvError::Disconnected) => {
          info!("Notification worker: all senders dropped. Terminating.");
          break;
        }
      }
    }
  }

  /// Waits for the notification worker to process every pending event.
  pub(crate) async fn await_shutdown(&self) {
    let handle_option = self.state.lock().worker_join_handle.take();
    if let Some(handle) = handle_option {
      debug!(pool_name = %*self.pool_name, "Notifier: Waiting for notification worker to join.");
      if let Err(e) = handle.await {
        error!(pool_name = %*self.pool_name, "Notifier: Error joining notification worker: {:?}", e);
      }
    } else {
      trace!(pool_name = %*self.pool_name, "Notifier: Worker was never started or already joined.");
    }
  }
}
