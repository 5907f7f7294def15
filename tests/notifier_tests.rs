use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tinybatch::{ShutdownMode, TaskCompletionInfo, TaskCompletionStatus, TaskToExecute, TransferPool};
use tokio::runtime::Handle as TokioHandle;
use tokio::time::sleep;

fn create_task(duration_ms: u64, should_panic: bool) -> TaskToExecute<u32> {
  Box::pin(async move {
    sleep(Duration::from_millis(duration_ms)).await;
    if should_panic {
      panic!("intentional panic (notifier test)");
    }
    7
  })
}

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tinybatch=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[tokio::test]
async fn test_completion_info_carries_label_and_status() {
  setup_tracing_for_test();
  let pool_name = "notifier_status_pool";
  let pool = TransferPool::<u32>::new(2, 4, TokioHandle::current(), pool_name);
  let events: Arc<parking_lot::Mutex<Vec<TaskCompletionInfo>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
  {
    let events = events.clone();
    pool.on_completion(move |info| events.lock().push(info));
  }

  let ok_handle = pool.submit("ok.png", create_task(10, false)).await.unwrap();
  let panic_handle = pool.submit("broken.jpg", create_task(10, true)).await.unwrap();
  let ok_id = ok_handle.id();
  let panic_id = panic_handle.id();

  pool.shutdown(ShutdownMode::Drain).await.unwrap();

  let events = events.lock();
  assert_eq!(events.len(), 2);
  let ok_event = events.iter().find(|e| e.task_id == ok_id).expect("event for ok task");
  assert_eq!(ok_event.label, "ok.png");
  assert_eq!(ok_event.status, TaskCompletionStatus::Completed);
  assert_eq!(ok_event.pool_name.as_str(), pool_name);

  let panic_event = events.iter().find(|e| e.task_id == panic_id).expect("event for panicked task");
  assert_eq!(panic_event.label, "broken.jpg");
  assert_eq!(panic_event.status, TaskCompletionStatus::Panicked);
}

#[tokio::test]
async fn test_multiple_handlers_all_called() {
  setup_tracing_for_test();
  let pool = TransferPool::<u32>::new(3, 6, TokioHandle::current(), "notifier_multi_handler_pool");
  let first = Arc::new(AtomicUsize::new(0));
  let second = Arc::new(AtomicUsize::new(0));
  {
    let first = first.clone();
    pool.on_completion(move |_| {
      first.fetch_add(1, Ordering::SeqCst);
    });
    let second = second.clone();
    pool.on_completion(move |_| {
      second.fetch_add(1, Ordering::SeqCst);
    });
  }

  for i in 0..6 {
    pool.submit(format!("f{}.png", i), create_task(5, false)).await.unwrap();
  }
  pool.shutdown(ShutdownMode::Drain).await.unwrap();

  assert_eq!(first.load(Ordering::SeqCst), 6);
  assert_eq!(second.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_notifications() {
  setup_tracing_for_test();
  let pool = TransferPool::<u32>::new(1, 3, TokioHandle::current(), "notifier_panicking_handler_pool");
  let counted = Arc::new(AtomicUsize::new(0));
  pool.on_completion(|_| panic!("handler blew up"));
  {
    let counted = counted.clone();
    pool.on_completion(move |_| {
      counted.fetch_add(1, Ordering::SeqCst);
    });
  }

  let mut handles = Vec::new();
  for i in 0..3 {
    handles.push(pool.submit(format!("f{}.png", i), create_task(5, false)).await.unwrap());
  }
  pool.clone().shutdown(ShutdownMode::Drain).await.unwrap();

  assert_eq!(counted.load(Ordering::SeqCst), 3);
  for handle in handles {
    assert_eq!(handle.await_result().await, Ok(7));
  }
}

#[tokio::test]
async fn test_tasks_dispatched_before_registration_are_not_reported() {
  setup_tracing_for_test();
  let pool = TransferPool::<u32>::new(1, 2, TokioHandle::current(), "notifier_late_handler_pool");

  let early = pool.submit("early.png", create_task(5, false)).await.unwrap();
  assert_eq!(early.await_result().await, Ok(7));

  let seen = Arc::new(AtomicUsize::new(0));
  {
    let seen = seen.clone();
    pool.on_completion(move |_| {
      seen.fetch_add(1, Ordering::SeqCst);
    });
  }
  pool.submit("late.png", create_task(5, false)).await.unwrap();
  pool.shutdown(ShutdownMode::Drain).await.unwrap();

  assert_eq!(seen.load(Ordering::SeqCst), 1);
}
