//! JSON snapshot persistence.
//!
//! Snapshots are written as a full-file rewrite on every save. Load returns
//! `None` when no snapshot exists yet, so first startup is not an error.

use crate::{hlog_warn, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `value` and rewrite the snapshot file.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Save, logging a warning instead of failing. Persistence problems
    /// must not take down the coordination loop.
    pub fn save_logged<T: Serialize>(&self, value: &T, what: &str) {
        if let Err(e) = self.save(value) {
            hlog_warn!("failed to persist {} to {}: {}", what, self.path.display(), e);
        }
    }

    /// Load the snapshot, or `None` if the file does not exist yet.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)?;
        let value = serde_json::from_str(&json)?;
        Ok(Some(value))
    }

    /// Load, logging a warning instead of failing. A snapshot corrupted by
    /// a crash mid-write must not keep the process from restarting; the
    /// caller starts from empty state and the next save rewrites the file.
    pub fn load_logged<T: DeserializeOwned>(&self, what: &str) -> Option<T> {
        match self.load() {
            Ok(value) => value,
            Err(e) => {
                hlog_warn!(
                    "failed to restore {} from {}: {}",
                    what,
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}
