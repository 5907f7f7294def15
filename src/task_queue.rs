use crate::error::PoolError;
use crate::task::ManagedTaskInternal;

use fibre::mpsc::{self, AsyncReceiver, AsyncSender, RecvError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// An internal message type that pairs a task with the queue slot it holds.
///
/// The slot is released when this message is dropped, which happens right
/// after the dispatcher has received it. A queue slot is therefore only freed
/// once a task has been fully dequeued.
pub(crate) struct QueueMessage<R: Send + 'static> {
  pub(crate) task: ManagedTaskInternal<R>,
  _slot: OwnedSemaphorePermit,
}

impl<R: Send + 'static> fmt::Debug for QueueMessage<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueMessage")
      .field("task_id", &self.task.task_id)
      .field("label", &self.task.label)
      .finish_non_exhaustive()
  }
}

/// A bounded FIFO queue of tasks waiting for a free concurrency slot.
///
/// The capacity is enforced by a semaphore on top of an unbounded
/// `fibre::mpsc` channel, so producers wait asynchronously when the queue is
/// full instead of failing.
pub(crate) struct TaskQueue<R: Send + 'static> {
  tx: AsyncSender<QueueMessage<R>>,
  rx: AsyncReceiver<QueueMessage<R>>,
  slots: Arc<Semaphore>,
  capacity: usize,
}

impl<R: Send + 'static> TaskQueue<R> {
  /// Creates a new `TaskQueue` holding at most `capacity` tasks (at least one).
  pub(crate) fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::unbounded_async();
    Self {
      tx,
      rx,
      slots: Arc::new(Semaphore::new(capacity)),
      capacity,
    }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer<R>, QueueConsumer<R>) {
    (
      QueueProducer {
        tx: self.tx,
        slots: self.slots,
        closed: Arc::new(AtomicBool::new(false)),
        capacity: self.capacity,
      },
      QueueConsumer { rx: self.rx },
    )
  }
}

/// The producer half. Cloned into every submission site.
pub(crate) struct QueueProducer<R: Send + 'static> {
  tx: AsyncSender<QueueMessage<R>>,
  slots: Arc<Semaphore>,
  // Shared by all clones. The channel itself only reports a dropped receiver.
  closed: Arc<AtomicBool>,
  capacity: usize,
}

impl<R: Send + 'static> Clone for QueueProducer<R> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      slots: self.slots.clone(),
      closed: self.closed.clone(),
      capacity: self.capacity,
    }
  }
}

/// The consumer half. Not cloneable: the dispatcher loop is the only reader.
pub(crate) struct QueueConsumer<R: Send + 'static> {
  rx: AsyncReceiver<QueueMessage<R>>,
}

impl<R: Send + 'static> fmt::Debug for QueueProducer<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .field("free_slots", &self.free_slots())
      .field("capacity", &self.capacity)
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> QueueProducer<R> {
  /// Sends a task into the queue, waiting for a free slot if the queue is full.
  ///
  /// The slot travels inside the `QueueMessage`; if sending fails the message
  /// is dropped together with its slot. A queue closed before or during the
  /// send reports `PoolShuttingDown`.
  pub(crate) async fn send(
    &self,
    task: ManagedTaskInternal<R>,
    shutdown_token: &CancellationToken,
  ) -> Result<(), PoolError> {
    if shutdown_token.is_cancelled() || self.is_closed() {
      return Err(PoolError::PoolShuttingDown);
    }

    let slot = tokio::select! {
      biased;
      _ = shutdown_token.cancelled() => return Err(PoolError::PoolShuttingDown),
      acquired = self.slots.clone().acquire_owned() => {
        acquired.map_err(|_| PoolError::SemaphoreClosed)?
      }
    };

    if self.is_closed() {
      return Err(PoolError::PoolShuttingDown);
    }

    let message = QueueMessage { task, _slot: slot };
    self.tx.send(message).await.map_err(|_| {
      if self.is_closed() {
        PoolError::PoolShuttingDown
      } else {
        PoolError::QueueSendChannelClosed
      }
    })
  }

  /// Closes the sending side of the queue. Tasks already queued stay receivable.
  pub(crate) fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
    let _ = self.tx.close();
  }

  /// True once `close` was called on any clone, or the consumer is gone.
  pub(crate) fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
  }

  /// Returns the number of tasks waiting in the queue.
  pub(crate) fn len(&self) -> usize {
    self.tx.len()
  }

  pub(crate) fn free_slots(&self) -> usize {
    self.slots.available_permits()
  }
}

impl<R: Send + 'static> QueueConsumer<R> {
  /// Receives the next task in submission order.
  ///
  /// The slot inside the received `QueueMessage` is dropped here, freeing room
  /// for a waiting producer.
  pub(crate) async fn recv(&self) -> Result<ManagedTaskInternal<R>, RecvError> {
    let message = self.rx.recv().await?;
    Ok(message.task)
  }
}
