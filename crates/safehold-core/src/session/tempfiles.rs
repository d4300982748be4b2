//! Temporary attachment files and their scheduled deletion.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Files written for external viewers, deleted on lock and shutdown.
#[derive(Debug, Default)]
pub struct TempFiles {
    scheduled: Vec<PathBuf>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, path: PathBuf) {
        tracing::debug!("Scheduling {} for deletion", path.display());
        self.scheduled.push(path);
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Delete every scheduled file. Failures are logged and skipped.
    ///
    /// Returns the number of files removed.
    pub fn delete_all(&mut self) -> usize {
        let mut removed = 0;
        for path in self.scheduled.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Skipping deletion of tmpfile {}: {}", path.display(), e);
                }
            }
        }
        removed
    }
}

/// Write attachment bytes to a new temporary file that keeps the file's
/// extension, and return its path. The file outlives this call.
pub fn write_attachment(filename: &str, data: &[u8]) -> Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("attachment");

    let mut file = tempfile::Builder::new()
        .prefix("safehold-")
        .suffix(&format!("-{name}"))
        .tempfile()
        .context("Failed to create temporary attachment file")?;

    file.write_all(data)
        .with_context(|| format!("Failed to write attachment {}", name))?;

    let (_file, path) = file
        .keep()
        .context("Failed to keep temporary attachment file")?;
    Ok(path)
}
