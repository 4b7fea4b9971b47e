//! Dispatch planner: owns the parsed phase/task graph and answers the
//! question "what can run next".
//!
//! Tasks qualify for dispatch when they are Pending and every dependency
//! resolves to a Completed task. Mutating transitions are snapshotted
//! immediately so the plan position survives a crash.

use crate::core::graph::DependencyGraph;
use crate::core::task::{Phase, SwarmTask, SwarmTaskId, TaskState};
use crate::orchestration::plan::{parse_plan, PlanSource};
use crate::state::store::SnapshotStore;
use crate::{hlog, hlog_warn, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Event fired when the planner records a completion.
#[derive(Debug, Clone)]
pub enum PlanEvent {
    TaskCompleted { id: SwarmTaskId, worker: Option<String> },
}

/// Per-task entry in the durable snapshot, keyed by task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate plan progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub blocked: usize,
}

impl PlanSummary {
    pub fn all_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

pub struct DispatchPlanner {
    phases: Vec<Phase>,
    index: HashMap<SwarmTaskId, (usize, usize)>,
    graph: DependencyGraph,
    store: Option<SnapshotStore>,
    events: Option<mpsc::UnboundedSender<PlanEvent>>,
}

impl DispatchPlanner {
    /// Parse a plan source into a live planner. Dependency edges that name
    /// an unknown task or would close a cycle are dropped with a warning;
    /// the task carrying an unknown dependency simply never dispatches.
    pub fn initialize(source: &PlanSource) -> Self {
        let phases = parse_plan(source);
        let mut planner = Self {
            phases,
            index: HashMap::new(),
            graph: DependencyGraph::new(),
            store: None,
            events: None,
        };
        planner.build_index();
        planner
    }

    fn build_index(&mut self) {
        self.index.clear();
        self.graph = DependencyGraph::new();
        for (pi, phase) in self.phases.iter().enumerate() {
            for (ti, task) in phase.tasks.iter().enumerate() {
                self.index.insert(task.id, (pi, ti));
                self.graph.add_task(task.id);
            }
        }
        let mut dropped: Vec<(SwarmTaskId, SwarmTaskId)> = Vec::new();
        for phase in &self.phases {
            for task in &phase.tasks {
                for dep in &task.depends {
                    if !self.graph.contains(*dep) {
                        hlog_warn!("task {} depends on unknown task {}", task.id, dep);
                        continue;
                    }
                    if let Err(e) = self.graph.add_dependency(task.id, *dep) {
                        hlog_warn!("dropping dependency edge: {}", e);
                        dropped.push((task.id, *dep));
                    }
                }
            }
        }
        // Cycle-closing edges were kept out of the graph; strip them from
        // the task lists too so both views of the plan agree.
        for (id, dep) in dropped {
            if let Some(task) = self.task_mut(id) {
                task.depends.retain(|d| *d != dep);
            }
        }
        hlog!(
            "plan loaded: {} phases, {} tasks",
            self.phases.len(),
            self.index.len()
        );
    }

    /// Attach a snapshot store and restore any state persisted by a
    /// previous run, merging it into the freshly parsed plan. An
    /// unreadable snapshot is logged and the parsed plan stands as-is.
    pub fn attach_store(&mut self, store: SnapshotStore) {
        if let Some(snapshot) =
            store.load_logged::<HashMap<SwarmTaskId, TaskSnapshot>>("plan task states")
        {
            let mut restored = 0usize;
            for (id, entry) in snapshot {
                if let Some(task) = self.task_mut(id) {
                    task.state = entry.state;
                    task.assigned_to = entry.assigned_to;
                    task.assigned_at = entry.assigned_at;
                    task.completed_at = entry.completed_at;
                    restored += 1;
                }
            }
            if restored > 0 {
                hlog!("restored state for {} plan tasks", restored);
            }
        }
        self.store = Some(store);
    }

    /// Register the channel that receives completion events.
    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<PlanEvent>) {
        self.events = Some(sender);
    }

    fn task(&self, id: SwarmTaskId) -> Option<&SwarmTask> {
        let (pi, ti) = *self.index.get(&id)?;
        Some(&self.phases[pi].tasks[ti])
    }

    fn task_mut(&mut self, id: SwarmTaskId) -> Option<&mut SwarmTask> {
        let (pi, ti) = *self.index.get(&id)?;
        Some(&mut self.phases[pi].tasks[ti])
    }

    fn completed_ids(&self) -> HashSet<SwarmTaskId> {
        self.phases
            .iter()
            .flat_map(|p| &p.tasks)
            .filter(|t| t.is_completed())
            .map(|t| t.id)
            .collect()
    }

    /// A task may dispatch when the graph says its surviving edges are
    /// satisfied. A dependency on a task the plan never declared keeps
    /// the task parked.
    fn deps_met(&self, task: &SwarmTask, completed: &HashSet<SwarmTaskId>) -> bool {
        task.depends.iter().all(|d| self.graph.contains(*d))
            && self.graph.deps_satisfied(task.id, completed)
    }

    /// Up to `max_count` dispatchable tasks in first-declared order.
    /// Completed phases are skipped entirely.
    pub fn next_dispatchable(&self, max_count: usize) -> Vec<SwarmTask> {
        let completed = self.completed_ids();
        let mut out = Vec::new();
        for phase in &self.phases {
            if phase.is_completed() {
                continue;
            }
            for task in &phase.tasks {
                if out.len() == max_count {
                    return out;
                }
                if task.is_pending() && self.deps_met(task, &completed) {
                    out.push(task.clone());
                }
            }
        }
        out
    }

    /// Record that a task's payload was handed to a worker. Rejects the
    /// transition when a dependency is not yet Completed.
    pub fn mark_dispatched(&mut self, id: SwarmTaskId, worker: &str) -> Result<()> {
        let task = self
            .task(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        let completed = self.completed_ids();
        let unmet = task
            .depends
            .iter()
            .copied()
            .find(|d| !self.graph.contains(*d))
            .or_else(|| {
                self.graph
                    .deps_of(id)
                    .into_iter()
                    .find(|d| !completed.contains(d))
            });
        if let Some(dep) = unmet {
            return Err(Error::DependencyUnmet {
                task: id.to_string(),
                dep: dep.to_string(),
            });
        }
        if !task.is_pending() {
            return Err(Error::InvalidTransition {
                from: task.state.to_string(),
                to: TaskState::Dispatched.to_string(),
            });
        }
        if let Some(task) = self.task_mut(id) {
            task.mark_dispatched(worker);
        }
        self.snapshot();
        Ok(())
    }

    /// The assigned worker has started executing the task.
    pub fn mark_in_progress(&mut self, id: SwarmTaskId) -> Result<()> {
        let task = self
            .task_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        task.mark_in_progress();
        self.snapshot();
        Ok(())
    }

    /// Record completion: updates the task and its phase's derived state,
    /// fires the completion event, and snapshots.
    pub fn mark_completed(&mut self, id: SwarmTaskId) -> Result<()> {
        let (pi, worker) = {
            let (pi, _) = *self
                .index
                .get(&id)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            let task = self.task_mut(id).ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
            if task.is_completed() {
                return Ok(());
            }
            task.mark_completed();
            (pi, task.assigned_to.clone())
        };

        let phase = &self.phases[pi];
        if phase.is_completed() {
            hlog!("phase {} ({}) completed", phase.number, phase.title);
        }
        if let Some(events) = &self.events {
            let _ = events.send(PlanEvent::TaskCompleted { id, worker });
        }
        self.snapshot();
        Ok(())
    }

    /// Mark a task blocked with a reason.
    pub fn mark_blocked(&mut self, id: SwarmTaskId, reason: &str) -> Result<()> {
        let task = self
            .task_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        task.block(reason);
        self.snapshot();
        Ok(())
    }

    fn snapshot(&self) {
        let Some(store) = &self.store else { return };
        let entries: HashMap<SwarmTaskId, TaskSnapshot> = self
            .phases
            .iter()
            .flat_map(|p| p.tasks.iter())
            .map(|t| {
                (
                    t.id,
                    TaskSnapshot {
                        state: t.state.clone(),
                        assigned_to: t.assigned_to.clone(),
                        assigned_at: t.assigned_at,
                        completed_at: t.completed_at,
                    },
                )
            })
            .collect();
        store.save_logged(&entries, "plan task states");
    }

    pub fn get_task(&self, id: SwarmTaskId) -> Option<&SwarmTask> {
        self.task(id)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn state_summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            total: 0,
            pending: 0,
            active: 0,
            completed: 0,
            blocked: 0,
        };
        for task in self.phases.iter().flat_map(|p| p.tasks.iter()) {
            summary.total += 1;
            match task.state {
                TaskState::Pending => summary.pending += 1,
                TaskState::Dispatched | TaskState::InProgress => summary.active += 1,
                TaskState::Completed | TaskState::Skipped => summary.completed += 1,
                TaskState::Blocked { .. } => summary.blocked += 1,
            }
        }
        summary
    }

    pub fn all_complete(&self) -> bool {
        self.state_summary().all_complete()
    }
}
