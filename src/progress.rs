//! Per-file progress lines.

use crate::error::JobError;
use crate::job::FileReport;
use parking_lot::Mutex;
use tracing::{error, info};

/// Receives one line per finished file.
pub trait ProgressLog: Send + Sync {
  fn success(&self, report: &FileReport);
  fn failure(&self, file_name: &str, error: &JobError);
}

pub fn success_line(report: &FileReport) -> String {
  format!(
    "compressed {} [{}] -> [{}] {:.2}%",
    report.file_name,
    report.input_size,
    report.output_size,
    report.ratio_percent()
  )
}

pub fn failure_line(file_name: &str, error: &JobError) -> String {
  format!("failed {}: {}", file_name, error)
}

/// Prints success lines on stdout and failures on stderr.
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressLog for ConsoleProgress {
  fn success(&self, report: &FileReport) {
    info!(file = %report.file_name, input = report.input_size, output = report.output_size, "File compressed.");
    println!("{}", success_line(report));
  }

  fn failure(&self, file_name: &str, error: &JobError) {
    error!(file = %file_name, "File failed: {}", error);
    eprintln!("{}", failure_line(file_name, error));
  }
}

/// Keeps every line in memory, in the order they were reported.
#[derive(Debug, Default)]
pub struct MemoryProgress {
  lines: Mutex<Vec<String>>,
}

impl MemoryProgress {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn lines(&self) -> Vec<String> {
    self.lines.lock().clone()
  }
}

impl ProgressLog for MemoryProgress {
  fn success(&self, report: &FileReport) {
    self.lines.lock().push(success_line(report));
  }

  fn failure(&self, file_name: &str, error: &JobError) {
    self.lines.lock().push(failure_line(file_name, error));
  }
}
