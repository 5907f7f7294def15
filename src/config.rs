//! Command line and run configuration.

use crate::compressor::DEFAULT_ENDPOINTS;
use crate::error::BatchError;
use crate::scanner::ImageFilter;

use clap::Parser;
use std::path::{Path, PathBuf};

/// Name of the subdirectory of the working directory receiving the results.
pub const OUTPUT_DIR_NAME: &str = "__tinypng_dir";

/// Maximum number of files in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Shrink every PNG/JPEG image of a directory through the online compressor.
#[derive(Parser, Debug, Clone)]
#[command(name = "tinybatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Shrink every PNG/JPEG in a directory through an online compressor")]
pub struct CliArgs {
  /// Directory containing the images (results go to its __tinypng_dir subdirectory)
  #[arg(value_name = "DIR", default_value = ".")]
  pub dir: PathBuf,
}

/// Everything a batch run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct BatchConfig {
  pub working_dir: PathBuf,
  pub output_dir: PathBuf,
  pub concurrency: usize,
  pub filter: ImageFilter,
  pub endpoints: Vec<String>,
}

impl BatchConfig {
  /// Configuration with defaults for `working_dir`, taken as-is.
  pub fn for_dir(working_dir: impl Into<PathBuf>) -> Self {
    let working_dir = working_dir.into();
    Self {
      output_dir: working_dir.join(OUTPUT_DIR_NAME),
      working_dir,
      concurrency: DEFAULT_CONCURRENCY,
      filter: ImageFilter::default(),
      endpoints: DEFAULT_ENDPOINTS.iter().map(|host| host.to_string()).collect(),
    }
  }

  /// Resolves the CLI directory against the process working directory.
  pub fn from_cli(args: &CliArgs) -> Result<Self, BatchError> {
    let cwd = std::env::current_dir().map_err(|e| BatchError::Config(format!("cannot determine current directory: {}", e)))?;
    Ok(Self::for_dir(resolve_dir(&cwd, &args.dir)))
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }
}

fn resolve_dir(cwd: &Path, dir: &Path) -> PathBuf {
  if dir.is_absolute() {
    dir.to_path_buf()
  } else if dir == Path::new(".") {
    cwd.to_path_buf()
  } else {
    cwd.join(dir)
  }
}
