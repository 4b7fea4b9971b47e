//! Round scheduler: one pass of deciding who speaks and running their
//! turns concurrently.
//!
//! Turn execution is opaque behind [`TurnRunner`]; the scheduler only
//! decides who runs, bounds in-flight turns with one process-wide permit,
//! and broadcasts outputs in completion order so shared context stays
//! consistent even when turns finish out of submission order. A fault
//! inside a turn becomes a failed outcome, never a crashed round.

use crate::core::task::WorkerRole;
use crate::orchestration::pool::{WorkerHandle, WorkerPool, WorkerStatus};
use crate::{hlog, hlog_warn, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::Instant;

/// What a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub text: String,
}

/// Executes one worker turn. The scheduling core never looks inside.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(&self, worker: &str, context: &[String]) -> Result<TurnOutput>;
}

/// Stateless "do you want to speak" predicate, evaluated per round.
pub trait TurnPolicy: Send + Sync {
    fn wants_turn(&self, worker: &WorkerHandle, ctx: &RoundContext) -> bool;
}

/// Facts a policy may consult when deciding whether to speak.
#[derive(Debug, Clone, Default)]
pub struct RoundContext {
    /// External input arrived since the last round.
    pub has_new_input: bool,
    /// Open (non-terminal) items across the backlog.
    pub backlog_open: usize,
    /// Backlog changed since the last progress report.
    pub backlog_changed: bool,
}

/// The orchestrator speaks when there is new external input to act on.
pub struct OrchestratorPolicy;

impl TurnPolicy for OrchestratorPolicy {
    fn wants_turn(&self, _worker: &WorkerHandle, ctx: &RoundContext) -> bool {
        ctx.has_new_input
    }
}

/// The reporter speaks when the backlog changed since its last report.
/// The scheduler additionally rate-limits it with a cooldown.
pub struct ReporterPolicy;

impl TurnPolicy for ReporterPolicy {
    fn wants_turn(&self, _worker: &WorkerHandle, ctx: &RoundContext) -> bool {
        ctx.backlog_changed
    }
}

/// Ordinary workers speak only while they are executing a task.
pub struct TaskWorkerPolicy;

impl TurnPolicy for TaskWorkerPolicy {
    fn wants_turn(&self, worker: &WorkerHandle, _ctx: &RoundContext) -> bool {
        worker.status == WorkerStatus::Working
    }
}

#[derive(Debug, Clone)]
pub enum RoundEvent {
    TurnFailed { worker: String, error: String },
    /// The backlog drained; ask the orchestrator for more work or a
    /// completion summary. Rate-limited, emitted once per drain.
    BacklogDrained,
}

#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub round: u64,
    pub turns_run: usize,
    pub failures: usize,
}

pub struct RoundScheduler {
    pool: Arc<Mutex<WorkerPool>>,
    runner: Arc<dyn TurnRunner>,
    /// Process-wide cap on in-flight turns, shared across rounds.
    permits: Arc<Semaphore>,
    events: mpsc::UnboundedSender<RoundEvent>,
    round: u64,
    report_cooldown: Duration,
    last_report: Option<Instant>,
    escalation_cooldown: Duration,
    last_escalation: Option<Instant>,
    drain_reported: bool,
}

impl RoundScheduler {
    pub fn new(
        pool: Arc<Mutex<WorkerPool>>,
        runner: Arc<dyn TurnRunner>,
        permits: Arc<Semaphore>,
        events: mpsc::UnboundedSender<RoundEvent>,
        report_cooldown: Duration,
        escalation_cooldown: Duration,
    ) -> Self {
        Self {
            pool,
            runner,
            permits,
            events,
            round: 0,
            report_cooldown,
            last_report: None,
            escalation_cooldown,
            last_escalation: None,
            drain_reported: false,
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// Run one full round: main pass, one bounded sub-pass for workers
    /// still busy afterwards, then the backlog-drained check.
    pub async fn run_round(&mut self, ctx: &RoundContext) -> Result<RoundReport> {
        self.round += 1;
        let mut report = RoundReport {
            round: self.round,
            ..Default::default()
        };

        let speakers = self.pick_speakers(ctx).await;
        hlog!("round {}: {} speakers", self.round, speakers.len());
        self.run_pass(&speakers, &mut report).await;

        // Exactly one extra pass for workers still busy after the first,
        // e.g. freshly dispatched ones.
        let stragglers: Vec<String> = {
            let pool = self.pool.lock().await;
            pool.list()
                .iter()
                .filter(|w| w.status == WorkerStatus::Working)
                .map(|w| w.name.clone())
                .collect()
        };
        if !stragglers.is_empty() {
            self.run_pass(&stragglers, &mut report).await;
        }

        if ctx.backlog_open > 0 {
            self.drain_reported = false;
        } else {
            self.report_drained();
        }
        Ok(report)
    }

    /// Partition workers and apply each group's policy: the orchestrator
    /// is always evaluated, the reporter has its own trigger plus a
    /// cooldown, the rest go busy-first.
    async fn pick_speakers(&mut self, ctx: &RoundContext) -> Vec<String> {
        let pool_handle = Arc::clone(&self.pool);
        let pool = pool_handle.lock().await;
        let mut speakers = Vec::new();

        for worker in pool.list() {
            let wants = match worker.role {
                WorkerRole::Orchestrator => OrchestratorPolicy.wants_turn(worker, ctx),
                WorkerRole::Reporter => {
                    ReporterPolicy.wants_turn(worker, ctx) && self.report_due()
                }
                _ => TaskWorkerPolicy.wants_turn(worker, ctx),
            };
            if wants {
                if worker.role == WorkerRole::Reporter {
                    self.last_report = Some(Instant::now());
                }
                speakers.push(worker.name.clone());
            }
        }
        speakers
    }

    fn report_due(&self) -> bool {
        match self.last_report {
            None => true,
            Some(last) => last.elapsed() >= self.report_cooldown,
        }
    }

    /// Start every listed turn concurrently under the shared permit and
    /// handle outcomes in completion order.
    async fn run_pass(&mut self, names: &[String], report: &mut RoundReport) {
        let mut in_flight = FuturesUnordered::new();

        for name in names {
            let context: Vec<String> = {
                let pool = self.pool.lock().await;
                match pool.get(name) {
                    Some(w) => w.notes.clone(),
                    None => continue,
                }
            };
            let runner = Arc::clone(&self.runner);
            let permits = Arc::clone(&self.permits);
            let name = name.clone();
            in_flight.push(tokio::spawn(async move {
                // Closing the semaphore is not part of this design, so
                // acquisition only fails if the runtime is tearing down.
                let _permit = permits.acquire_owned().await;
                let outcome = runner.run_turn(&name, &context).await;
                (name, outcome)
            }));
        }

        while let Some(joined) = in_flight.next().await {
            report.turns_run += 1;
            match joined {
                Ok((name, Ok(output))) => {
                    let mut pool = self.pool.lock().await;
                    pool.broadcast(&name, &output.text);
                }
                Ok((name, Err(e))) => {
                    report.failures += 1;
                    hlog_warn!("turn failed for {}: {}", name, e);
                    let _ = self.events.send(RoundEvent::TurnFailed {
                        worker: name,
                        error: e.to_string(),
                    });
                }
                Err(join_err) => {
                    // A panicking turn is converted into a failed outcome.
                    report.failures += 1;
                    hlog_warn!("turn task fault: {}", join_err);
                    let _ = self.events.send(RoundEvent::TurnFailed {
                        worker: String::from("unknown"),
                        error: join_err.to_string(),
                    });
                }
            }
        }
    }

    /// Emit one rate-limited drained notice per drain.
    fn report_drained(&mut self) {
        if self.drain_reported {
            return;
        }
        if let Some(last) = self.last_escalation {
            if last.elapsed() < self.escalation_cooldown {
                return;
            }
        }
        self.drain_reported = true;
        self.last_escalation = Some(Instant::now());
        hlog!("backlog drained, asking orchestrator for more work");
        let _ = self.events.send(RoundEvent::BacklogDrained);
    }
}
