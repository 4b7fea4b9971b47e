//! Advisory resource locks.
//!
//! Workers claim paths before editing them so two workers never write the
//! same file concurrently. Locks are in-memory and advisory; paths are
//! normalized lexically because the files a task will touch often do not
//! exist yet.

use crate::{hlog_debug, Error, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Lexical path normalization: resolves `.` and `..` segments and drops
/// trailing separators without consulting the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[derive(Debug, Default)]
pub struct LockManager {
    held: HashMap<PathBuf, String>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a path for a holder. Re-claiming a path you already hold is
    /// a no-op; a path held by someone else is an error.
    pub fn claim(&mut self, path: &Path, holder: &str) -> Result<()> {
        let path = normalize_path(path);
        match self.held.get(&path) {
            Some(current) if current == holder => Ok(()),
            Some(current) => Err(Error::LockHeld {
                path,
                holder: current.clone(),
            }),
            None => {
                hlog_debug!("lock claimed: {} by {}", path.display(), holder);
                self.held.insert(path, holder.to_string());
                Ok(())
            }
        }
    }

    /// Release a path. Releasing an unclaimed path is a no-op; releasing a
    /// path held by someone else is an error.
    pub fn release(&mut self, path: &Path, holder: &str) -> Result<()> {
        let path = normalize_path(path);
        match self.held.get(&path) {
            None => Ok(()),
            Some(current) if current == holder => {
                self.held.remove(&path);
                Ok(())
            }
            Some(_) => Err(Error::LockNotHeld {
                path,
                holder: holder.to_string(),
            }),
        }
    }

    /// Check whether someone other than `holder` has claimed the path.
    pub fn is_locked_by_other(&self, path: &Path, holder: &str) -> bool {
        let path = normalize_path(path);
        matches!(self.held.get(&path), Some(current) if current != holder)
    }

    pub fn holder_of(&self, path: &Path) -> Option<&str> {
        self.held.get(&normalize_path(path)).map(String::as_str)
    }

    /// Drop every lock a holder has, e.g. when its task ends or the worker
    /// goes away. Returns the released paths.
    pub fn release_all_by_holder(&mut self, holder: &str) -> Vec<PathBuf> {
        let released: Vec<PathBuf> = self
            .held
            .iter()
            .filter(|(_, h)| h.as_str() == holder)
            .map(|(p, _)| p.clone())
            .collect();
        for path in &released {
            self.held.remove(path);
        }
        if !released.is_empty() {
            hlog_debug!("released {} locks held by {}", released.len(), holder);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
