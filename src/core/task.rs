//! Task data model for the dispatch plan.
//!
//! SwarmTasks are the dispatchable units parsed from a plan document. Each
//! task tracks its lifecycle state, role, assignment, dependencies, and the
//! dispatch payload rendered once at parse time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

/// Composite identifier for a plan-derived task: `"phase.ordinal"`.
///
/// Created once at parse time and never reused. Orders first by phase,
/// then by ordinal within the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwarmTaskId {
    pub phase: u32,
    pub ordinal: u32,
}

impl SwarmTaskId {
    pub fn new(phase: u32, ordinal: u32) -> Self {
        Self { phase, ordinal }
    }
}

impl std::fmt::Display for SwarmTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.phase, self.ordinal)
    }
}

impl std::str::FromStr for SwarmTaskId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (phase, ordinal) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid task id: {}", s))?;
        let phase = phase
            .trim()
            .parse()
            .map_err(|_| format!("invalid phase in task id: {}", s))?;
        let ordinal = ordinal
            .trim()
            .parse()
            .map_err(|_| format!("invalid ordinal in task id: {}", s))?;
        Ok(Self { phase, ordinal })
    }
}

// Serialized as the "phase.ordinal" string so snapshots keyed by task id
// stay human-readable.
impl Serialize for SwarmTaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SwarmTaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Role a worker must have to execute a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Coordinates the swarm; exactly one per process.
    Orchestrator,
    /// Produces progress reports; exactly one per process.
    Reporter,
    Frontend,
    Backend,
    Qa,
    Ops,
    Writer,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Orchestrator => "orchestrator",
            WorkerRole::Reporter => "reporter",
            WorkerRole::Frontend => "frontend",
            WorkerRole::Backend => "backend",
            WorkerRole::Qa => "qa",
            WorkerRole::Ops => "ops",
            WorkerRole::Writer => "writer",
        }
    }

    /// Singleton roles are reused across tasks; the rest may multiply
    /// with a numeric suffix when extra capacity is needed.
    pub fn is_singleton(&self) -> bool {
        !matches!(self, WorkerRole::Frontend | WorkerRole::Backend)
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "orchestrator" => Some(WorkerRole::Orchestrator),
            "reporter" => Some(WorkerRole::Reporter),
            "frontend" => Some(WorkerRole::Frontend),
            "backend" => Some(WorkerRole::Backend),
            "qa" | "tester" => Some(WorkerRole::Qa),
            "ops" | "devops" => Some(WorkerRole::Ops),
            "writer" | "docs" => Some(WorkerRole::Writer),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SwarmTask lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    /// Parsed but not yet handed to a worker.
    Pending,
    /// Payload handed to a worker, turn not started.
    Dispatched,
    /// A worker is actively executing the task.
    InProgress,
    /// Task finished successfully.
    Completed,
    /// Task cannot proceed.
    Blocked {
        /// Reason why the task is blocked.
        reason: String,
    },
    /// Task was deliberately skipped.
    Skipped,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Dispatched => write!(f, "dispatched"),
            TaskState::InProgress => write!(f, "in_progress"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Blocked { reason } => write!(f, "blocked: {}", reason),
            TaskState::Skipped => write!(f, "skipped"),
        }
    }
}

/// A dispatchable unit of work parsed from the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTask {
    /// Composite identifier, `"phase.ordinal"`.
    pub id: SwarmTaskId,
    /// Human-readable title from the task heading.
    pub title: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Role a worker must have to execute this task.
    pub role: WorkerRole,
    /// Name of the worker the task was handed to, if any.
    pub assigned_to: Option<String>,
    /// Priority hint from `@priority:` (lower is more urgent).
    pub priority: u8,
    /// Ids of tasks that must be Completed before this one dispatches.
    pub depends: Vec<SwarmTaskId>,
    /// Goal text from the `**Goal:**` sub-section.
    pub goal: String,
    /// Files the task declares it will touch.
    pub files: Vec<PathBuf>,
    /// Requirement lines, capped at five.
    pub requirements: Vec<String>,
    /// Completion criterion from `@done_when:`.
    pub done_when: Option<String>,
    /// Dispatch payload, rendered once at parse time.
    pub payload: String,
    /// When the task was handed to a worker.
    pub assigned_at: Option<DateTime<Utc>>,
    /// When the task reached Completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl SwarmTask {
    /// Hand the task to a worker. Transitions Pending -> Dispatched and
    /// records the assignment time.
    pub fn mark_dispatched(&mut self, worker: &str) {
        self.state = TaskState::Dispatched;
        self.assigned_to = Some(worker.to_string());
        self.assigned_at = Some(Utc::now());
    }

    /// The assigned worker has started executing.
    pub fn mark_in_progress(&mut self) {
        self.state = TaskState::InProgress;
    }

    /// Mark the task as completed and stamp the completion time.
    pub fn mark_completed(&mut self) {
        self.state = TaskState::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task as blocked with a reason.
    pub fn block(&mut self, reason: &str) {
        self.state = TaskState::Blocked {
            reason: reason.to_string(),
        };
    }

    /// Mark the task as deliberately skipped.
    pub fn skip(&mut self) {
        self.state = TaskState::Skipped;
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, TaskState::Completed)
    }

    /// Check if the task is eligible for dependency checking and dispatch.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, TaskState::Pending)
    }
}

/// Derived phase lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    NotStarted,
    InProgress,
    Completed,
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseState::NotStarted => write!(f, "not_started"),
            PhaseState::InProgress => write!(f, "in_progress"),
            PhaseState::Completed => write!(f, "completed"),
        }
    }
}

/// An ordered bucket of tasks. Completion derives from the children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub number: u32,
    pub title: String,
    /// Phase was already marked complete in the overview table.
    pub declared_complete: bool,
    /// Tasks in first-declared order.
    pub tasks: Vec<SwarmTask>,
}

impl Phase {
    pub fn new(number: u32, title: &str) -> Self {
        Self {
            number,
            title: title.to_string(),
            declared_complete: false,
            tasks: Vec::new(),
        }
    }

    /// Derived state: Completed iff all child tasks are Completed (or the
    /// overview table declared the phase complete).
    pub fn state(&self) -> PhaseState {
        if self.declared_complete {
            return PhaseState::Completed;
        }
        if !self.tasks.is_empty() && self.tasks.iter().all(|t| t.is_completed()) {
            return PhaseState::Completed;
        }
        if self.tasks.iter().any(|t| !t.is_pending()) {
            return PhaseState::InProgress;
        }
        PhaseState::NotStarted
    }

    pub fn is_completed(&self) -> bool {
        self.state() == PhaseState::Completed
    }
}
