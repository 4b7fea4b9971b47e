//! hive: swarm coordination for a pool of task workers.
//!
//! A plan document is parsed into a phase/task graph, the auto-dispatcher
//! fills free worker capacity with dependency-ready tasks, and the round
//! scheduler runs worker turns concurrently under a process-wide permit.
//! All durable state is snapshotted as JSON and reloaded at startup.

pub mod config;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod locks;
pub mod log;
pub mod orchestration;
pub mod ownership;
pub mod registry;
pub mod state;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorEvents};
pub use crate::core::graph::DependencyGraph;
pub use crate::core::task::{Phase, PhaseState, SwarmTask, SwarmTaskId, TaskState, WorkerRole};
pub use error::{Error, Result};
pub use locks::LockManager;
pub use orchestration::dispatcher::{AutoDispatcher, DispatchEvent};
pub use orchestration::guard::TurnGuard;
pub use orchestration::plan::{parse_plan, PlanSource};
pub use orchestration::planner::{DispatchPlanner, PlanEvent, PlanSummary};
pub use orchestration::pool::{WorkerEvent, WorkerHandle, WorkerPool, WorkerStatus};
pub use orchestration::round::{
    RoundContext, RoundEvent, RoundReport, RoundScheduler, TurnOutput, TurnRunner,
};
pub use ownership::{Conflict, FileKind, OwnershipRecord, OwnershipTracker};
pub use registry::{Task, TaskId, TaskRegistry, TaskStatus};
pub use state::store::SnapshotStore;
