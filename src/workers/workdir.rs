//! Per-job scratch directories under the worker's temp root.

use crate::common::artifacts::SOURCE_FILE_NAME;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// `{root}/{video_id}`, created empty for each attempt and removed when the
/// attempt ends. Dropping without [`WorkDir::remove`] still removes it, so an
/// aborted attempt leaves nothing behind for the next one to trip over.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// Creates the directory, discarding whatever an earlier attempt left there.
    pub async fn create(root: &Path, video_id: Uuid) -> io::Result<Self> {
        let path = root.join(video_id.to_string());

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed leftover working directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&path).await?;

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the downloaded source goes.
    pub fn source_path(&self) -> PathBuf {
        self.path.join(SOURCE_FILE_NAME)
    }

    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Failed to remove working directory: {}", e);
            }
        }
    }
}

/// Empties `root`, creating it if needed. Returns how many entries were removed.
///
/// Only safe while this process is the sole worker using `root`.
pub async fn sweep(root: &Path) -> io::Result<usize> {
    tokio::fs::create_dir_all(root).await?;

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), "Could not sweep stale entry: {}", e),
        }
    }
    Ok(removed)
}
