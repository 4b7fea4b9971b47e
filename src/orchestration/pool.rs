//! Worker pool bookkeeping.
//!
//! The pool tracks named worker handles and their busy state. The scheduling
//! core only spawns, assigns, and inspects status; what a worker does with a
//! payload is opaque. Singleton roles are reused across tasks; frontend and
//! backend workers may multiply with a numeric suffix when extra capacity
//! is needed.

use crate::core::task::WorkerRole;
use crate::{hlog, Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Working,
}

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub name: String,
    pub role: WorkerRole,
    pub status: WorkerStatus,
    /// Id of the task the worker is currently executing.
    pub current_task: Option<String>,
    /// Shared-context notes broadcast by other workers' finished turns.
    pub notes: Vec<String>,
    pub spawned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Spawned { name: String, role: WorkerRole },
    Assigned { name: String, task: String },
    Finished { name: String },
}

pub struct WorkerPool {
    workers: HashMap<String, WorkerHandle>,
    max_workers: usize,
    events: Option<mpsc::UnboundedSender<WorkerEvent>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            workers: HashMap::new(),
            max_workers,
            events: None,
        }
    }

    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<WorkerEvent>) {
        self.events = Some(sender);
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Spawn a new worker with a unique name for its role.
    pub fn spawn(&mut self, role: WorkerRole) -> Result<String> {
        if self.workers.len() >= self.max_workers {
            return Err(Error::PoolFull {
                max: self.max_workers,
            });
        }
        let name = self.next_name(role);
        hlog!("spawning worker {} ({})", name, role);
        self.workers.insert(
            name.clone(),
            WorkerHandle {
                name: name.clone(),
                role,
                status: WorkerStatus::Idle,
                current_task: None,
                notes: Vec::new(),
                spawned_at: Utc::now(),
            },
        );
        self.emit(WorkerEvent::Spawned {
            name: name.clone(),
            role,
        });
        Ok(name)
    }

    fn next_name(&self, role: WorkerRole) -> String {
        if role.is_singleton() {
            return role.as_str().to_string();
        }
        let existing = self.workers.values().filter(|w| w.role == role).count();
        if existing == 0 {
            role.as_str().to_string()
        } else {
            format!("{}-{}", role.as_str(), existing + 1)
        }
    }

    /// Find a worker able to take a task of this role, spawning one if
    /// needed. Singletons are always reused; multiplying roles reuse an
    /// idle worker before growing.
    pub fn ensure_worker(&mut self, role: WorkerRole) -> Result<String> {
        if role.is_singleton() {
            if let Some(w) = self.workers.values().find(|w| w.role == role) {
                return Ok(w.name.clone());
            }
            return self.spawn(role);
        }
        if let Some(w) = self
            .workers
            .values()
            .find(|w| w.role == role && w.status == WorkerStatus::Idle)
        {
            return Ok(w.name.clone());
        }
        self.spawn(role)
    }

    /// Hand a pre-rendered payload to a worker and mark it Working.
    pub fn assign(&mut self, name: &str, task_id: &str, payload: &str) -> Result<()> {
        let worker = self
            .workers
            .get_mut(name)
            .ok_or_else(|| Error::WorkerNotFound(name.to_string()))?;
        worker.status = WorkerStatus::Working;
        worker.current_task = Some(task_id.to_string());
        worker.notes.push(payload.to_string());
        self.emit(WorkerEvent::Assigned {
            name: name.to_string(),
            task: task_id.to_string(),
        });
        Ok(())
    }

    /// Mark a worker idle again after its task finished.
    pub fn finish(&mut self, name: &str) -> Result<()> {
        let worker = self
            .workers
            .get_mut(name)
            .ok_or_else(|| Error::WorkerNotFound(name.to_string()))?;
        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        self.emit(WorkerEvent::Finished {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn status(&self, name: &str) -> Result<WorkerStatus> {
        self.workers
            .get(name)
            .map(|w| w.status)
            .ok_or_else(|| Error::WorkerNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&WorkerHandle> {
        self.workers.get(name)
    }

    /// All handles, busiest first, then by name for determinism.
    pub fn list(&self) -> Vec<&WorkerHandle> {
        let mut all: Vec<&WorkerHandle> = self.workers.values().collect();
        all.sort_by_key(|w| (w.status == WorkerStatus::Idle, w.name.clone()));
        all
    }

    pub fn busy_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Working)
            .count()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Append a note to every worker except the sender, keeping shared
    /// context consistent as turns finish out of order.
    pub fn broadcast(&mut self, from: &str, note: &str) {
        for worker in self.workers.values_mut() {
            if worker.name != from {
                worker.notes.push(format!("[{}] {}", from, note));
            }
        }
    }

    /// Remove a worker entirely. Returns its handle for teardown cleanup.
    pub fn remove(&mut self, name: &str) -> Option<WorkerHandle> {
        self.workers.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_status() {
        let mut pool = WorkerPool::new(4);
        let name = pool.spawn(WorkerRole::Backend).unwrap();
        assert_eq!(name, "backend");
        assert_eq!(pool.status(&name).unwrap(), WorkerStatus::Idle);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut pool = WorkerPool::new(1);
        pool.spawn(WorkerRole::Backend).unwrap();
        let result = pool.spawn(WorkerRole::Frontend);
        assert!(matches!(result, Err(Error::PoolFull { max: 1 })));
    }

    #[test]
    fn test_multiplying_role_gets_suffix() {
        let mut pool = WorkerPool::new(4);
        assert_eq!(pool.spawn(WorkerRole::Backend).unwrap(), "backend");
        assert_eq!(pool.spawn(WorkerRole::Backend).unwrap(), "backend-2");
        assert_eq!(pool.spawn(WorkerRole::Backend).unwrap(), "backend-3");
    }

    #[test]
    fn test_singleton_reused() {
        let mut pool = WorkerPool::new(4);
        let first = pool.ensure_worker(WorkerRole::Qa).unwrap();
        pool.assign(&first, "1.1", "payload").unwrap();
        // Busy or not, the singleton is reused.
        let second = pool.ensure_worker(WorkerRole::Qa).unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_multiplying_role_grows_when_busy() {
        let mut pool = WorkerPool::new(4);
        let first = pool.ensure_worker(WorkerRole::Backend).unwrap();
        pool.assign(&first, "1.1", "payload").unwrap();

        let second = pool.ensure_worker(WorkerRole::Backend).unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.len(), 2);

        // An idle one is reused instead of growing again.
        let third = pool.ensure_worker(WorkerRole::Backend).unwrap();
        assert_eq!(third, second);
    }

    #[test]
    fn test_assign_and_finish_lifecycle() {
        let mut pool = WorkerPool::new(4);
        let name = pool.spawn(WorkerRole::Backend).unwrap();
        pool.assign(&name, "1.1", "do the thing").unwrap();
        assert_eq!(pool.status(&name).unwrap(), WorkerStatus::Working);
        assert_eq!(pool.busy_count(), 1);
        assert_eq!(pool.get(&name).unwrap().current_task.as_deref(), Some("1.1"));

        pool.finish(&name).unwrap();
        assert_eq!(pool.status(&name).unwrap(), WorkerStatus::Idle);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn test_assign_unknown_worker() {
        let mut pool = WorkerPool::new(4);
        let result = pool.assign("ghost", "1.1", "payload");
        assert!(matches!(result, Err(Error::WorkerNotFound(_))));
    }

    #[test]
    fn test_list_busy_first() {
        let mut pool = WorkerPool::new(4);
        pool.spawn(WorkerRole::Backend).unwrap();
        let frontend = pool.spawn(WorkerRole::Frontend).unwrap();
        pool.assign(&frontend, "1.1", "payload").unwrap();

        let list = pool.list();
        assert_eq!(list[0].name, "frontend");
        assert_eq!(list[1].name, "backend");
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let mut pool = WorkerPool::new(4);
        pool.spawn(WorkerRole::Backend).unwrap();
        pool.spawn(WorkerRole::Frontend).unwrap();

        pool.broadcast("backend", "storage layer done");
        assert!(pool.get("backend").unwrap().notes.is_empty());
        assert_eq!(pool.get("frontend").unwrap().notes.len(), 1);
        assert!(pool.get("frontend").unwrap().notes[0].contains("storage layer done"));
    }

    #[test]
    fn test_events_emitted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(4);
        pool.set_event_sender(tx);

        let name = pool.spawn(WorkerRole::Backend).unwrap();
        pool.assign(&name, "1.1", "payload").unwrap();
        pool.finish(&name).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), WorkerEvent::Spawned { .. }));
        assert!(matches!(rx.try_recv().unwrap(), WorkerEvent::Assigned { .. }));
        assert!(matches!(rx.try_recv().unwrap(), WorkerEvent::Finished { .. }));
    }
}
