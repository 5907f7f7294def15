//! Work enumeration: which files in the working directory get compressed.

use crate::error::BatchError;
use std::path::Path;
use tracing::{debug, warn};

/// Extension allow-list for candidate images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFilter {
  extensions: Vec<String>,
}

impl Default for ImageFilter {
  fn default() -> Self {
    Self::new(["png", "jpg", "jpeg"])
  }
}

impl ImageFilter {
  /// Builds a filter from extensions given with or without the leading dot.
  pub fn new<I, S>(extensions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      extensions: extensions
        .into_iter()
        .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect(),
    }
  }

  pub fn extensions(&self) -> &[String] {
    &self.extensions
  }

  /// Case-insensitive match on the final extension of `name`.
  pub fn matches(&self, name: &str) -> bool {
    match Path::new(name).extension().and_then(|ext| ext.to_str()) {
      Some(ext) => self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)),
      None => false,
    }
  }
}

/// Lists the regular files in `dir` accepted by `filter`, sorted by name.
///
/// Subdirectories are never returned, even when their name looks like an
/// image. An unreadable directory is fatal for the run.
pub fn list_images(dir: &Path, filter: &ImageFilter) -> Result<Vec<String>, BatchError> {
  let enumerate_error = |source: std::io::Error| BatchError::Enumerate {
    path: dir.to_path_buf(),
    source,
  };

  let mut names = Vec::new();
  for entry in std::fs::read_dir(dir).map_err(enumerate_error)? {
    let entry = entry.map_err(enumerate_error)?;
    let file_name = entry.file_name();
    let Some(name) = file_name.to_str() else {
      warn!(entry = ?file_name, "Skipping entry with a non UTF-8 name.");
      continue;
    };
    if !filter.matches(name) {
      continue;
    }
    // Follows symlinks so a link to an image is treated like the image.
    match std::fs::metadata(entry.path()) {
      Ok(meta) if meta.is_file() => names.push(name.to_string()),
      Ok(_) => debug!(%name, "Skipping non-file entry."),
      Err(e) => warn!(%name, "Skipping entry whose metadata cannot be read: {}", e),
    }
  }

  names.sort();
  debug!(dir = %dir.display(), count = names.len(), "Enumerated candidate images.");
  Ok(names)
}
