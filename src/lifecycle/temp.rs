use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

/// The only writable host location: one directory per process, removed on every exit path
#[derive(Debug)]
pub struct TempRoot {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl TempRoot {
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("suitey-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "Created temporary root");
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh uniquely named directory under the root
    pub fn subdir(&self, prefix: &str) -> io::Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", prefix))
            .tempdir_in(&self.path)?;
        // the root owns cleanup of everything below it
        Ok(dir.keep())
    }

    pub fn is_cleaned(&self) -> bool {
        self.dir
            .lock()
            .map(|d| d.is_none())
            .unwrap_or(false)
    }

    /// Idempotent
    pub fn cleanup(&self) {
        let dir = self
            .dir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(dir) = dir {
            if let Err(e) = dir.close() {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temporary root");
            }
        }
    }
}

impl Drop for TempRoot {
    fn drop(&mut self) {
        self.cleanup();
    }
}
