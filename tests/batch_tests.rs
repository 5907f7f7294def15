use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tinybatch::compressor::{Compressor, ShrinkReport};
use tinybatch::config::BatchConfig;
use tinybatch::progress::{MemoryProgress, ProgressLog};
use tinybatch::{run_batch, BatchError, JobError};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Clone)]
enum MockReply {
  Shrunk { input: u64, output: u64 },
  Rejected(&'static str),
  Panic,
}

/// In-process stand-in for the compression service.
#[derive(Default)]
struct MockCompressor {
  replies: HashMap<String, MockReply>,
  delay: Duration,
  in_flight: AtomicUsize,
  peak_in_flight: AtomicUsize,
  uploads: parking_lot::Mutex<Vec<String>>,
}

impl MockCompressor {
  fn new(replies: impl IntoIterator<Item = (&'static str, MockReply)>) -> Self {
    Self {
      replies: replies.into_iter().map(|(name, reply)| (name.to_string(), reply)).collect(),
      ..Self::default()
    }
  }

  fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  fn upload_count(&self) -> usize {
    self.uploads.lock().len()
  }
}

#[async_trait]
impl Compressor for MockCompressor {
  async fn shrink(&self, file_name: &str, _body: Vec<u8>) -> Result<ShrinkReport, JobError> {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    self.uploads.lock().push(file_name.to_string());
    tokio::time::sleep(self.delay).await;
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    match self.replies.get(file_name).cloned() {
      Some(MockReply::Shrunk { input, output }) => Ok(ShrinkReport {
        input_size: input,
        output_size: output,
        url: format!("mock://{}", file_name),
      }),
      Some(MockReply::Rejected(message)) => Err(JobError::Service {
        message: message.to_string(),
      }),
      Some(MockReply::Panic) => panic!("mock service crashed on {}", file_name),
      None => Err(JobError::Service {
        message: "unknown file".to_string(),
      }),
    }
  }

  async fn download(&self, url: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, JobError> {
    let name = url.trim_start_matches("mock://");
    let size = match self.replies.get(name) {
      Some(MockReply::Shrunk { output, .. }) => *output,
      _ => {
        return Err(JobError::Download {
          url: url.to_string(),
          message: "not found".to_string(),
        })
      }
    };
    sink
      .write_all(&vec![0xAB; size as usize])
      .await
      .map_err(|e| JobError::Download {
        url: url.to_string(),
        message: e.to_string(),
      })?;
    Ok(size)
  }
}

fn write_file(dir: &Path, name: &str, len: usize) {
  std::fs::write(dir.join(name), vec![1u8; len]).unwrap();
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
  std::fs::read_dir(dir)
    .unwrap()
    .map(|entry| {
      let entry = entry.unwrap();
      (
        entry.file_name().to_string_lossy().into_owned(),
        std::fs::read(entry.path()).unwrap(),
      )
    })
    .collect()
}

#[tokio::test]
async fn test_end_to_end_success_and_rejection() {
  let dir = TempDir::new().unwrap();
  write_file(dir.path(), "a.png", 1000);
  write_file(dir.path(), "b.jpg", 2000);

  let compressor = Arc::new(MockCompressor::new([
    ("a.png", MockReply::Shrunk { input: 1000, output: 500 }),
    ("b.jpg", MockReply::Rejected("Unsupported image")),
  ]));
  let progress = Arc::new(MemoryProgress::new());
  let config = BatchConfig::for_dir(dir.path());

  let summary = run_batch(&config, compressor.clone(), progress.clone()).await.unwrap();

  assert_eq!(summary.discovered, 2);
  assert_eq!(summary.compressed, 1);
  assert_eq!(summary.failed, 1);
  assert_eq!(summary.bytes_in, 1000);
  assert_eq!(summary.bytes_out, 500);

  let output = snapshot(&config.output_dir);
  assert_eq!(output.len(), 1);
  assert_eq!(output["a.png"].len(), 500);
  assert!(!config.output_dir.join("b.jpg").exists());

  let lines = progress.lines();
  assert_eq!(lines.len(), 2);
  let successes: Vec<_> = lines.iter().filter(|l| l.contains("50.00%")).collect();
  assert_eq!(successes.len(), 1);
  assert!(successes[0].contains("a.png"));
  assert!(successes[0].contains("[1000] -> [500]"));
  let failures: Vec<_> = lines.iter().filter(|l| l.starts_with("failed")).collect();
  assert_eq!(failures.len(), 1);
  assert!(failures[0].contains("b.jpg"));
  assert!(failures[0].contains("Unsupported image"));
}

#[tokio::test]
async fn test_every_eligible_file_is_dispatched_once() {
  let dir = TempDir::new().unwrap();
  let images = ["1.png", "2.png", "3.jpg", "4.jpeg", "5.PNG", "6.jpg", "7.png"];
  for name in images {
    write_file(dir.path(), name, 10);
  }
  write_file(dir.path(), "readme.md", 10);
  write_file(dir.path(), "anim.gif", 10);
  std::fs::create_dir(dir.path().join("nested.png")).unwrap();

  let compressor = Arc::new(MockCompressor::new(
    images.map(|name| (name, MockReply::Shrunk { input: 10, output: 4 })),
  ));
  let progress = Arc::new(MemoryProgress::new());
  let summary = run_batch(&BatchConfig::for_dir(dir.path()), compressor.clone(), progress)
    .await
    .unwrap();

  assert_eq!(summary.discovered, images.len());
  assert_eq!(compressor.upload_count(), images.len());
  let mut uploaded = compressor.uploads.lock().clone();
  uploaded.sort();
  uploaded.dedup();
  assert_eq!(uploaded.len(), images.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_uploads_respect_concurrency_budget() {
  let dir = TempDir::new().unwrap();
  let names: Vec<&'static str> = vec![
    "a.png", "b.png", "c.png", "d.png", "e.png", "f.png", "g.png", "h.png", "i.png", "j.png", "k.png", "l.png",
  ];
  for name in &names {
    write_file(dir.path(), name, 8);
  }
  let compressor = Arc::new(
    MockCompressor::new(names.iter().map(|n| (*n, MockReply::Shrunk { input: 8, output: 8 })))
      .with_delay(Duration::from_millis(20)),
  );
  let config = BatchConfig::for_dir(dir.path()).with_concurrency(3);

  let summary = run_batch(&config, compressor.clone(), Arc::new(MemoryProgress::new()))
    .await
    .unwrap();

  assert_eq!(summary.compressed, names.len());
  let peak = compressor.peak_in_flight.load(Ordering::SeqCst);
  assert!(peak <= 3, "peak in-flight uploads {} exceeded budget", peak);
  assert!(peak >= 2, "uploads were not overlapped at all (peak {})", peak);
}

#[tokio::test]
async fn test_one_rejection_does_not_stop_siblings() {
  let dir = TempDir::new().unwrap();
  let names = ["1.png", "2.png", "3.png", "4.png", "5.png"];
  for name in names {
    write_file(dir.path(), name, 100);
  }
  let compressor = Arc::new(MockCompressor::new(names.map(|name| {
    let reply = if name == "3.png" {
      MockReply::Rejected("Too many requests")
    } else {
      MockReply::Shrunk { input: 100, output: 25 }
    };
    (name, reply)
  })));
  let progress = Arc::new(MemoryProgress::new());
  let config = BatchConfig::for_dir(dir.path()).with_concurrency(2);

  let summary = run_batch(&config, compressor, progress.clone()).await.unwrap();

  assert_eq!(summary.compressed, 4);
  assert_eq!(summary.failed, 1);
  let output = snapshot(&config.output_dir);
  assert_eq!(output.keys().cloned().collect::<Vec<_>>(), vec!["1.png", "2.png", "4.png", "5.png"]);
  assert_eq!(progress.lines().iter().filter(|l| l.contains("25.00%")).count(), 4);
}

#[tokio::test]
async fn test_panicking_job_is_reported_and_counted() {
  let dir = TempDir::new().unwrap();
  write_file(dir.path(), "ok.png", 10);
  write_file(dir.path(), "crash.png", 10);
  let compressor = Arc::new(MockCompressor::new([
    ("ok.png", MockReply::Shrunk { input: 10, output: 5 }),
    ("crash.png", MockReply::Panic),
  ]));
  let progress = Arc::new(MemoryProgress::new());

  let summary = run_batch(&BatchConfig::for_dir(dir.path()), compressor, progress.clone())
    .await
    .unwrap();

  assert_eq!(summary.compressed, 1);
  assert_eq!(summary.failed, 1);
  assert!(progress
    .lines()
    .iter()
    .any(|l| l.starts_with("failed crash.png") && l.contains("job aborted")));
}

#[tokio::test]
async fn test_running_twice_gives_same_output() {
  let dir = TempDir::new().unwrap();
  write_file(dir.path(), "a.png", 1000);
  write_file(dir.path(), "b.jpg", 300);
  write_file(dir.path(), "c.png", 50);
  let compressor = Arc::new(MockCompressor::new([
    ("a.png", MockReply::Shrunk { input: 1000, output: 400 }),
    ("b.jpg", MockReply::Shrunk { input: 300, output: 120 }),
    ("c.png", MockReply::Rejected("Bad image")),
  ]));
  let config = BatchConfig::for_dir(dir.path());

  let first = run_batch(&config, compressor.clone(), Arc::new(MemoryProgress::new())).await.unwrap();
  let first_output = snapshot(&config.output_dir);
  let second = run_batch(&config, compressor.clone(), Arc::new(MemoryProgress::new())).await.unwrap();
  let second_output = snapshot(&config.output_dir);

  assert_eq!(first, second);
  assert_eq!(first_output, second_output);
  assert_eq!(first_output.len(), 2);
}

#[tokio::test]
async fn test_empty_directory_creates_output_and_succeeds() {
  let dir = TempDir::new().unwrap();
  let compressor = Arc::new(MockCompressor::default());
  let config = BatchConfig::for_dir(dir.path());

  let summary = run_batch(&config, compressor.clone(), Arc::new(MemoryProgress::new())).await.unwrap();

  assert_eq!(summary.discovered, 0);
  assert_eq!(compressor.upload_count(), 0);
  assert!(config.output_dir.is_dir());
}

#[tokio::test]
async fn test_unreadable_working_dir_is_fatal() {
  let dir = TempDir::new().unwrap();
  let missing = dir.path().join("does-not-exist");
  let compressor = Arc::new(MockCompressor::default());
  let progress: Arc<dyn ProgressLog> = Arc::new(MemoryProgress::new());

  let result = run_batch(&BatchConfig::for_dir(&missing), compressor.clone(), progress).await;

  assert!(matches!(result, Err(BatchError::Enumerate { .. })));
  assert_eq!(compressor.upload_count(), 0);
  assert!(!missing.join("__tinypng_dir").exists());
}
