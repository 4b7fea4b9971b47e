//! Auto-dispatcher: fills free worker capacity deterministically.
//!
//! Triggered by a task-completion event or a manual advance. All decisions
//! happen under a single gate so concurrent triggers serialize instead of
//! double-dispatching. This component never invokes the reasoning layer;
//! it is pure bookkeeping between the planner and the pool.

use crate::core::task::SwarmTaskId;
use crate::orchestration::planner::DispatchPlanner;
use crate::orchestration::pool::{WorkerPool, WorkerStatus};
use crate::ownership::OwnershipTracker;
use crate::{hlog, hlog_warn, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// Tasks were handed out; one round should run for the new assignees.
    RoundRequested { dispatched: Vec<SwarmTaskId> },
    /// Nothing dispatchable and nobody busy: blocked on dependencies.
    WaitingOnDependencies,
    /// Every plan task is Completed. Emitted exactly once.
    AllDone,
}

struct Gate {
    last_decision: Option<Instant>,
    all_done_emitted: bool,
}

pub struct AutoDispatcher {
    planner: Arc<Mutex<DispatchPlanner>>,
    pool: Arc<Mutex<WorkerPool>>,
    ownership: Arc<Mutex<OwnershipTracker>>,
    events: mpsc::UnboundedSender<DispatchEvent>,
    max_parallel: usize,
    cooldown: Duration,
    gate: Mutex<Gate>,
}

impl AutoDispatcher {
    pub fn new(
        planner: Arc<Mutex<DispatchPlanner>>,
        pool: Arc<Mutex<WorkerPool>>,
        ownership: Arc<Mutex<OwnershipTracker>>,
        events: mpsc::UnboundedSender<DispatchEvent>,
        max_parallel: usize,
        cooldown: Duration,
    ) -> Self {
        Self {
            planner,
            pool,
            ownership,
            events,
            max_parallel,
            cooldown,
            gate: Mutex::new(Gate {
                last_decision: None,
                all_done_emitted: false,
            }),
        }
    }

    /// Run one dispatch decision. Returns the ids handed out.
    pub async fn advance(&self) -> Result<Vec<SwarmTaskId>> {
        let mut gate = self.gate.lock().await;

        // Cooldown: sleep out the remainder since the last decision.
        if let Some(last) = gate.last_decision {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                tokio::time::sleep(self.cooldown - elapsed).await;
            }
        }

        let busy = self.pool.lock().await.busy_count();
        let free = std::cmp::max(1, self.max_parallel.saturating_sub(busy));

        let candidates = self.planner.lock().await.next_dispatchable(free);
        if candidates.is_empty() {
            gate.last_decision = Some(Instant::now());
            let planner = self.planner.lock().await;
            if planner.all_complete() {
                if !gate.all_done_emitted {
                    gate.all_done_emitted = true;
                    hlog!("all plan tasks completed");
                    let _ = self.events.send(DispatchEvent::AllDone);
                }
            } else if busy == 0 {
                let _ = self.events.send(DispatchEvent::WaitingOnDependencies);
            }
            return Ok(Vec::new());
        }

        let mut dispatched = Vec::new();
        for task in candidates {
            let worker = {
                let mut pool = self.pool.lock().await;
                let name = match pool.ensure_worker(task.role) {
                    Ok(name) => name,
                    Err(e) => {
                        hlog_warn!("cannot place task {}: {}", task.id, e);
                        continue;
                    }
                };
                // A busy singleton keeps its current task; this one waits
                // for the next decision.
                if pool.status(&name)? == WorkerStatus::Working {
                    hlog!("task {} deferred: {} is busy", task.id, name);
                    continue;
                }
                name
            };

            if !task.files.is_empty() {
                let mut ownership = self.ownership.lock().await;
                for conflict in ownership.check_conflicts(&task.files, &worker) {
                    hlog_warn!(
                        "task {}: {} already owned by {}",
                        task.id,
                        conflict.path.display(),
                        conflict.owner
                    );
                }
                ownership.reserve_files(&task.files, &worker, &task.id.to_string());
            }

            self.pool
                .lock()
                .await
                .assign(&worker, &task.id.to_string(), &task.payload)?;
            self.planner
                .lock()
                .await
                .mark_dispatched(task.id, &worker)?;
            hlog!("dispatched task {} to {}", task.id, worker);
            dispatched.push(task.id);
        }

        gate.last_decision = Some(Instant::now());
        if !dispatched.is_empty() {
            // One round for the whole batch, not one per task.
            let _ = self.events.send(DispatchEvent::RoundRequested {
                dispatched: dispatched.clone(),
            });
        }
        Ok(dispatched)
    }
}
