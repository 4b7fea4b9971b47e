//! Top-level coordinator: constructs and owns every scheduling service.
//!
//! There are no process-wide singletons; one coordinator per process owns
//! the registry, locks, ownership, planner, pool, dispatcher, and round
//! scheduler, and hands shared handles to the pieces that need them.

use crate::config::Config;
use crate::locks::LockManager;
use crate::orchestration::dispatcher::{AutoDispatcher, DispatchEvent};
use crate::orchestration::guard::TurnGuard;
use crate::orchestration::plan::PlanSource;
use crate::orchestration::planner::{DispatchPlanner, PlanEvent, PlanSummary};
use crate::orchestration::pool::WorkerPool;
use crate::orchestration::round::{RoundContext, RoundEvent, RoundReport, RoundScheduler, TurnRunner};
use crate::ownership::OwnershipTracker;
use crate::registry::TaskRegistry;
use crate::state::store::SnapshotStore;
use crate::{hlog, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};

const PLAN_STATE_FILE: &str = "plan-state.json";
const REGISTRY_FILE: &str = "tasks.json";
const OWNERSHIP_FILE: &str = "ownership.json";

/// Receivers for every event stream the coordinator's services emit.
pub struct CoordinatorEvents {
    pub dispatch: mpsc::UnboundedReceiver<DispatchEvent>,
    pub plan: mpsc::UnboundedReceiver<PlanEvent>,
    pub round: mpsc::UnboundedReceiver<RoundEvent>,
}

pub struct Coordinator {
    config: Config,
    registry: Arc<Mutex<TaskRegistry>>,
    locks: Arc<Mutex<LockManager>>,
    ownership: Arc<Mutex<OwnershipTracker>>,
    planner: Arc<Mutex<DispatchPlanner>>,
    pool: Arc<Mutex<WorkerPool>>,
    dispatcher: AutoDispatcher,
    scheduler: RoundScheduler,
    /// Process-wide cap on concurrent worker turns.
    permits: Arc<Semaphore>,
    last_summary: Option<PlanSummary>,
}

impl Coordinator {
    /// Build a coordinator from a parsed plan, restoring durable state
    /// from the configured state directory.
    pub fn new(
        config: Config,
        source: &PlanSource,
        runner: Arc<dyn TurnRunner>,
    ) -> Result<(Self, CoordinatorEvents)> {
        config.ensure_dirs()?;
        let state_dir = config.state_dir()?;

        let registry = Arc::new(Mutex::new(TaskRegistry::with_store(SnapshotStore::new(
            state_dir.join(REGISTRY_FILE),
        ))));
        let ownership = Arc::new(Mutex::new(OwnershipTracker::with_store(
            SnapshotStore::new(state_dir.join(OWNERSHIP_FILE)),
        )));

        let (plan_tx, plan_rx) = mpsc::unbounded_channel();
        let mut planner = DispatchPlanner::initialize(source);
        planner.attach_store(SnapshotStore::new(state_dir.join(PLAN_STATE_FILE)));
        planner.set_event_sender(plan_tx);
        let planner = Arc::new(Mutex::new(planner));

        // Worker count is bounded well above max_parallel: idle singletons
        // and multiplied role workers persist between rounds.
        let pool = Arc::new(Mutex::new(WorkerPool::new(config.max_parallel * 4)));
        let permits = Arc::new(Semaphore::new(config.max_parallel));

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let dispatcher = AutoDispatcher::new(
            Arc::clone(&planner),
            Arc::clone(&pool),
            Arc::clone(&ownership),
            dispatch_tx,
            config.max_parallel,
            config.dispatch_cooldown(),
        );

        let (round_tx, round_rx) = mpsc::unbounded_channel();
        let scheduler = RoundScheduler::new(
            Arc::clone(&pool),
            runner,
            Arc::clone(&permits),
            round_tx,
            config.report_cooldown(),
            config.escalation_cooldown(),
        );

        let coordinator = Self {
            config,
            registry,
            locks: Arc::new(Mutex::new(LockManager::new())),
            ownership,
            planner,
            pool,
            dispatcher,
            scheduler,
            permits,
            last_summary: None,
        };
        let events = CoordinatorEvents {
            dispatch: dispatch_rx,
            plan: plan_rx,
            round: round_rx,
        };
        Ok((coordinator, events))
    }

    /// Completion boundary event: `(task id, worker, result text)`. Updates
    /// the plan, frees the worker and its reservations, then reruns the
    /// dispatcher to fill the freed capacity.
    pub async fn on_task_completed(
        &mut self,
        task_id: crate::core::task::SwarmTaskId,
        worker: &str,
        result: &str,
    ) -> Result<()> {
        hlog!("task {} completed by {}: {}", task_id, worker, result);
        self.planner.lock().await.mark_completed(task_id)?;
        self.ownership.lock().await.release_task(&task_id.to_string());
        self.pool.lock().await.finish(worker)?;
        self.dispatcher.advance().await?;
        Ok(())
    }

    /// Manual dispatch trigger.
    pub async fn advance(&self) -> Result<()> {
        self.dispatcher.advance().await?;
        Ok(())
    }

    /// Run one round. The round context is computed from current state;
    /// `has_new_input` is the only externally supplied fact.
    pub async fn run_round(&mut self, has_new_input: bool) -> Result<RoundReport> {
        let summary = self.planner.lock().await.state_summary();
        let registry_open = self.registry.lock().await.open_count();
        let ctx = RoundContext {
            has_new_input,
            backlog_open: summary.pending + summary.active + registry_open,
            backlog_changed: self.last_summary.as_ref() != Some(&summary),
        };
        let report = self.scheduler.run_round(&ctx).await;
        self.last_summary = Some(summary);
        report
    }

    /// Tear down a worker: release its locks and reservations, then drop
    /// the handle.
    pub async fn remove_worker(&self, name: &str) -> Result<()> {
        self.locks.lock().await.release_all_by_holder(name);
        self.ownership.lock().await.release_worker(name);
        self.pool.lock().await.remove(name);
        hlog!("worker {} removed", name);
        Ok(())
    }

    pub async fn state_summary(&self) -> PlanSummary {
        self.planner.lock().await.state_summary()
    }

    /// Fresh runaway guard for one worker turn, sized from the config.
    /// Turn runners call this at turn start and feed it every chained
    /// call and failure.
    pub fn new_turn_guard(&self) -> TurnGuard {
        TurnGuard::new(self.config.turn_depth_limit, self.config.repeat_call_window)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn permits(&self) -> &Arc<Semaphore> {
        &self.permits
    }

    pub fn registry(&self) -> &Arc<Mutex<TaskRegistry>> {
        &self.registry
    }

    pub fn locks(&self) -> &Arc<Mutex<LockManager>> {
        &self.locks
    }

    pub fn ownership(&self) -> &Arc<Mutex<OwnershipTracker>> {
        &self.ownership
    }

    pub fn planner(&self) -> &Arc<Mutex<DispatchPlanner>> {
        &self.planner
    }

    pub fn pool(&self) -> &Arc<Mutex<WorkerPool>> {
        &self.pool
    }
}
