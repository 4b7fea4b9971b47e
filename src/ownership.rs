//! Task-scoped ownership reservations over the file set.
//!
//! Complements the exclusive locks in [`crate::locks`]: when a task is
//! dispatched, every file it declares is reserved in bulk for the assigned
//! worker. Conflict checks are advisory; callers decide whether to warn or
//! block. Ownership is persisted after every mutation and reloaded at
//! startup so reservations survive a crash.

use crate::locks::normalize_path;
use crate::state::store::SnapshotStore;
use crate::hlog_debug;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub path: PathBuf,
    pub worker: String,
    pub task_id: String,
    pub kind: FileKind,
    pub reserved_at: DateTime<Utc>,
}

/// Advisory conflict: the candidate path (or its parent directory) is
/// already owned by another worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: PathBuf,
    pub owner: String,
}

#[derive(Debug)]
pub struct OwnershipTracker {
    by_path: HashMap<PathBuf, OwnershipRecord>,
    by_task: HashMap<String, HashSet<PathBuf>>,
    by_worker: HashMap<String, HashSet<PathBuf>>,
    store: Option<SnapshotStore>,
}

impl OwnershipTracker {
    pub fn new() -> Self {
        Self {
            by_path: HashMap::new(),
            by_task: HashMap::new(),
            by_worker: HashMap::new(),
            store: None,
        }
    }

    /// Create a tracker backed by a snapshot file, rebuilding the reverse
    /// indices from any records persisted by a previous run. An unreadable
    /// snapshot is logged and the tracker starts empty.
    pub fn with_store(store: SnapshotStore) -> Self {
        let by_path: HashMap<PathBuf, OwnershipRecord> =
            store.load_logged("ownership records").unwrap_or_default();
        let mut tracker = Self {
            by_path: HashMap::new(),
            by_task: HashMap::new(),
            by_worker: HashMap::new(),
            store: Some(store),
        };
        for (path, record) in by_path {
            tracker.index(path, record);
        }
        if !tracker.by_path.is_empty() {
            hlog_debug!("restored {} ownership records", tracker.by_path.len());
        }
        tracker
    }

    fn index(&mut self, path: PathBuf, record: OwnershipRecord) {
        self.by_task
            .entry(record.task_id.clone())
            .or_default()
            .insert(path.clone());
        self.by_worker
            .entry(record.worker.clone())
            .or_default()
            .insert(path.clone());
        self.by_path.insert(path, record);
    }

    fn unindex(&mut self, path: &Path) {
        if let Some(record) = self.by_path.remove(path) {
            if let Some(set) = self.by_task.get_mut(&record.task_id) {
                set.remove(path);
                if set.is_empty() {
                    self.by_task.remove(&record.task_id);
                }
            }
            if let Some(set) = self.by_worker.get_mut(&record.worker) {
                set.remove(path);
                if set.is_empty() {
                    self.by_worker.remove(&record.worker);
                }
            }
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            store.save_logged(&self.by_path, "ownership records");
        }
    }

    /// Reserve a set of paths for a worker's task. Paths already owned by
    /// the same worker are left as-is; reserving twice with the same
    /// arguments yields the same ownership set.
    pub fn reserve_files(&mut self, paths: &[PathBuf], worker: &str, task_id: &str) {
        let now = Utc::now();
        let mut reserved = 0usize;
        for raw in paths {
            let path = normalize_path(raw);
            if self.by_path.contains_key(&path) {
                continue;
            }
            let kind = if raw.extension().is_none() {
                FileKind::Directory
            } else {
                FileKind::File
            };
            self.index(
                path.clone(),
                OwnershipRecord {
                    path,
                    worker: worker.to_string(),
                    task_id: task_id.to_string(),
                    kind,
                    reserved_at: now,
                },
            );
            reserved += 1;
        }
        if reserved > 0 {
            hlog_debug!("reserved {} paths for {} (task {})", reserved, worker, task_id);
            self.persist();
        }
    }

    /// Advisory conflict scan: a candidate conflicts when the path itself,
    /// or its parent directory, is owned by a different worker.
    pub fn check_conflicts(&self, paths: &[PathBuf], worker: &str) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for raw in paths {
            let path = normalize_path(raw);
            let owner = self.by_path.get(&path).or_else(|| {
                path.parent().and_then(|parent| self.by_path.get(parent))
            });
            if let Some(record) = owner {
                if record.worker != worker {
                    conflicts.push(Conflict {
                        path,
                        owner: record.worker.clone(),
                    });
                }
            }
        }
        conflicts
    }

    /// True when the path is unowned or owned by this worker.
    pub fn can_write(&self, path: &Path, worker: &str) -> bool {
        match self.by_path.get(&normalize_path(path)) {
            None => true,
            Some(record) => record.worker == worker,
        }
    }

    pub fn owner_of(&self, path: &Path) -> Option<&OwnershipRecord> {
        self.by_path.get(&normalize_path(path))
    }

    /// Bulk-release everything a task reserved.
    pub fn release_task(&mut self, task_id: &str) -> usize {
        let paths: Vec<PathBuf> = self
            .by_task
            .get(task_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for path in &paths {
            self.unindex(path);
        }
        if !paths.is_empty() {
            hlog_debug!("released {} paths for task {}", paths.len(), task_id);
            self.persist();
        }
        paths.len()
    }

    /// Bulk-release everything a worker holds, across all its tasks.
    pub fn release_worker(&mut self, worker: &str) -> usize {
        let paths: Vec<PathBuf> = self
            .by_worker
            .get(worker)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for path in &paths {
            self.unindex(path);
        }
        if !paths.is_empty() {
            hlog_debug!("released {} paths for worker {}", paths.len(), worker);
            self.persist();
        }
        paths.len()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

impl Default for OwnershipTracker {
    fn default() -> Self {
        Self::new()
    }
}
