//! Registry of ad-hoc work items.
//!
//! The registry tracks units of work that are created at runtime rather than
//! parsed from a plan document. Every mutation is snapshotted to disk so the
//! backlog survives a crash.

use crate::state::store::SnapshotStore;
use crate::{hlog_debug, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Opaque registry task identifier. Distinct from plan task ids; the two
/// id spaces are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Status only moves forward: Pending -> InProgress -> terminal.
    /// Completion requires the task to have been picked up first; terminal
    /// states never change again.
    fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress) => true,
            (TaskStatus::Pending, TaskStatus::Failed) => true,
            (TaskStatus::InProgress, TaskStatus::Completed) => true,
            (TaskStatus::InProgress, TaskStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

// Status arrives as text at the completion boundary; anything outside the
// four known values is rejected, not guessed at.
impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" | "in progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    /// Outcome text recorded at completion or failure.
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    fn new(description: &str) -> Self {
        Self {
            id: TaskId::new(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            assigned_to: None,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Task>,
    store: Option<SnapshotStore>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            store: None,
        }
    }

    /// Create a registry backed by a snapshot file, restoring any tasks
    /// persisted by a previous run. An unreadable snapshot is logged and
    /// the registry starts empty.
    pub fn with_store(store: SnapshotStore) -> Self {
        let tasks: HashMap<TaskId, Task> =
            store.load_logged("task registry").unwrap_or_default();
        if !tasks.is_empty() {
            hlog_debug!("restored {} tasks from {}", tasks.len(), store.path().display());
        }
        Self {
            tasks,
            store: Some(store),
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            store.save_logged(&self.tasks, "task registry");
        }
    }

    /// Register a new pending task and return its id.
    pub fn create(&mut self, description: &str) -> TaskId {
        let task = Task::new(description);
        let id = task.id;
        hlog_debug!("task {} created: {}", id, description);
        self.tasks.insert(id, task);
        self.persist();
        id
    }

    /// Hand a pending task to a worker, moving it to InProgress.
    pub fn assign(&mut self, id: TaskId, worker: &str) -> Result<()> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if task.status != TaskStatus::Pending {
            return Err(Error::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::InProgress.to_string(),
            });
        }
        task.status = TaskStatus::InProgress;
        task.assigned_to = Some(worker.to_string());
        self.persist();
        Ok(())
    }

    /// Move a task to `next`, enforcing forward-only transitions. A result
    /// string, when given, is recorded on terminal transitions.
    pub fn update_status(
        &mut self,
        id: TaskId,
        next: TaskStatus,
        result: Option<&str>,
    ) -> Result<()> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if !task.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: task.status.to_string(),
                to: next.to_string(),
            });
        }
        task.status = next;
        if next.is_terminal() {
            if let Some(text) = result {
                task.result = Some(text.to_string());
            }
            task.completed_at = Some(Utc::now());
        }
        self.persist();
        Ok(())
    }

    /// Record successful completion. Completing an already-completed task
    /// is a no-op that keeps the first result and timestamp.
    pub fn complete(&mut self, id: TaskId, result: &str) -> Result<()> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if task.status == TaskStatus::Completed {
            hlog_debug!("task {} already completed, ignoring duplicate", id);
            return Ok(());
        }
        if !task.status.can_transition_to(TaskStatus::Completed) {
            return Err(Error::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Completed.to_string(),
            });
        }
        task.status = TaskStatus::Completed;
        task.result = Some(result.to_string());
        task.completed_at = Some(Utc::now());
        self.persist();
        Ok(())
    }

    /// Record failure with a reason.
    pub fn fail(&mut self, id: TaskId, reason: &str) -> Result<()> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if !task.status.can_transition_to(TaskStatus::Failed) {
            return Err(Error::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Failed.to_string(),
            });
        }
        task.status = TaskStatus::Failed;
        task.result = Some(reason.to_string());
        task.completed_at = Some(Utc::now());
        self.persist();
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All tasks in creation order.
    pub fn get_all(&self) -> Vec<&Task> {
        let mut all: Vec<&Task> = self.tasks.values().collect();
        all.sort_by_key(|t| t.created_at);
        all
    }

    pub fn get_by_worker(&self, worker: &str) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.assigned_to.as_deref() == Some(worker))
            .collect()
    }

    pub fn get_pending(&self) -> Vec<&Task> {
        let mut pending: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending
    }

    /// Count of tasks that have not reached a terminal state.
    pub fn open_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_get() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("write the parser");
        let task = registry.get(id).unwrap();
        assert_eq!(task.description, "write the parser");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_to.is_none());
    }

    #[test]
    fn test_assign_moves_to_in_progress() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        registry.assign(id, "backend").unwrap();
        let task = registry.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_to.as_deref(), Some("backend"));
    }

    #[test]
    fn test_assign_unknown_id() {
        let mut registry = TaskRegistry::new();
        let result = registry.assign(TaskId::new(), "backend");
        assert!(matches!(result, Err(Error::TaskNotFound(_))));
    }

    #[test]
    fn test_assign_twice_rejected() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        registry.assign(id, "backend").unwrap();
        let result = registry.assign(id, "frontend");
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn test_complete_records_result() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        registry.assign(id, "backend").unwrap();
        registry.complete(id, "done, see src/lib.rs").unwrap();
        let task = registry.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("done, see src/lib.rs"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_double_complete_keeps_first_result() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        registry.assign(id, "backend").unwrap();
        registry.complete(id, "first").unwrap();
        let first_time = registry.get(id).unwrap().completed_at;

        registry.complete(id, "second").unwrap();
        let task = registry.get(id).unwrap();
        assert_eq!(task.result.as_deref(), Some("first"));
        assert_eq!(task.completed_at, first_time);
    }

    #[test]
    fn test_failed_cannot_become_completed() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        registry.assign(id, "backend").unwrap();
        registry.fail(id, "compile error").unwrap();
        let result = registry.complete(id, "actually fine");
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_update_status_rejects_backwards() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        registry
            .update_status(id, TaskStatus::InProgress, None)
            .unwrap();
        let result = registry.update_status(id, TaskStatus::Pending, None);
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn test_update_status_requires_pickup_before_completion() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        let result = registry.update_status(id, TaskStatus::Completed, Some("done"));
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_update_status_records_result_on_terminal() {
        let mut registry = TaskRegistry::new();
        let id = registry.create("task");
        registry
            .update_status(id, TaskStatus::InProgress, None)
            .unwrap();
        registry
            .update_status(id, TaskStatus::Completed, Some("shipped"))
            .unwrap();

        let task = registry.get(id).unwrap();
        assert_eq!(task.result.as_deref(), Some("shipped"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_get_by_worker_and_pending() {
        let mut registry = TaskRegistry::new();
        let a = registry.create("one");
        let _b = registry.create("two");
        registry.assign(a, "backend").unwrap();

        assert_eq!(registry.get_by_worker("backend").len(), 1);
        assert_eq!(registry.get_pending().len(), 1);
        assert_eq!(registry.open_count(), 2);
    }

    #[test]
    fn test_get_all_creation_order() {
        let mut registry = TaskRegistry::new();
        let a = registry.create("first");
        let b = registry.create("second");
        let all = registry.get_all();
        assert_eq!(all[0].id, a);
        assert_eq!(all[1].id, b);
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("completed".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert_eq!("In Progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert!(matches!(
            "almost done".parse::<TaskStatus>(),
            Err(Error::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");

        let id = {
            let mut registry = TaskRegistry::with_store(SnapshotStore::new(&path));
            let id = registry.create("persisted task");
            registry.assign(id, "backend").unwrap();
            id
        };

        let restored = TaskRegistry::with_store(SnapshotStore::new(&path));
        let task = restored.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.description, "persisted task");
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{\"truncated").unwrap();

        let mut registry = TaskRegistry::with_store(SnapshotStore::new(&path));
        assert_eq!(registry.open_count(), 0);

        // The next save rewrites the damaged file.
        let id = registry.create("fresh start");
        let restored = TaskRegistry::with_store(SnapshotStore::new(&path));
        assert!(restored.get(id).is_some());
    }
}
