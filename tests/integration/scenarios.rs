//! End-to-end scheduling scenarios across planner, dispatcher, locks,
//! registry, and coordinator.

use crate::fixtures::{plan_source, EchoRunner, PHASE_ONE};
use hive::{
    AutoDispatcher, Config, Coordinator, DispatchEvent, DispatchPlanner, Error, LockManager,
    OwnershipTracker, PlanSource, SnapshotStore, SwarmTaskId, TaskRegistry, TaskStatus,
    WorkerPool,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};

fn id(s: &str) -> SwarmTaskId {
    s.parse().unwrap()
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        dispatch_cooldown_ms: 0,
        state_dir: Some(dir.path().to_string_lossy().into_owned()),
        ..Config::default()
    }
}

#[test]
fn dependency_gates_dispatch_order() {
    let mut planner = DispatchPlanner::initialize(&PlanSource {
        overview: String::new(),
        phase_docs: vec![(1, PHASE_ONE.to_string())],
    });

    // Only 1.1 qualifies while 1.2's dependency is open.
    let ready = planner.next_dispatchable(2);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, id("1.1"));

    planner.mark_completed(id("1.1")).unwrap();
    let ready = planner.next_dispatchable(2);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, id("1.2"));
}

#[tokio::test]
async fn freed_capacity_dispatches_exactly_one() {
    let doc = "## Task 1.1: A\n## Task 1.2: B\n## Task 1.3: C\n## Task 1.4: D\n";
    let planner = Arc::new(Mutex::new(DispatchPlanner::initialize(&PlanSource {
        overview: String::new(),
        phase_docs: vec![(1, doc.to_string())],
    })));
    let pool = Arc::new(Mutex::new(WorkerPool::new(16)));
    let (tx, _rx) = mpsc::unbounded_channel();
    let dispatcher = AutoDispatcher::new(
        Arc::clone(&planner),
        Arc::clone(&pool),
        Arc::new(Mutex::new(OwnershipTracker::new())),
        tx,
        3,
        Duration::ZERO,
    );

    let first = dispatcher.advance().await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(pool.lock().await.busy_count(), 3);

    // One worker finishes its task and frees capacity 1.
    let done = first[0];
    let worker = {
        let mut p = planner.lock().await;
        let worker = p.get_task(done).unwrap().assigned_to.clone().unwrap();
        p.mark_completed(done).unwrap();
        worker
    };
    pool.lock().await.finish(&worker).unwrap();

    let second = dispatcher.advance().await.unwrap();
    assert_eq!(second.len(), 1);
}

#[test]
fn lock_contention_and_handover() {
    let mut locks = LockManager::new();
    let path = Path::new("shared/x.py");

    locks.claim(path, "worker-a").unwrap();
    let denied = locks.claim(path, "worker-b");
    assert!(matches!(denied, Err(Error::LockHeld { ref holder, .. }) if holder == "worker-a"));

    locks.release(path, "worker-a").unwrap();
    locks.claim(path, "worker-b").unwrap();
    assert_eq!(locks.holder_of(path), Some("worker-b"));
}

#[test]
fn registry_lifecycle_with_idempotent_completion() {
    let mut registry = TaskRegistry::new();
    let task = registry.create("Implement login");

    registry.assign(task, "W1").unwrap();
    assert_eq!(registry.get(task).unwrap().status, TaskStatus::InProgress);

    registry.complete(task, "done").unwrap();
    let entry = registry.get(task).unwrap();
    assert_eq!(entry.status, TaskStatus::Completed);
    assert!(entry.completed_at.is_some());

    // A second completion is a no-op: the first result wins.
    registry.complete(task, "done again").unwrap();
    assert_eq!(registry.get(task).unwrap().result.as_deref(), Some("done"));
}

#[tokio::test]
async fn full_completion_emits_all_done_once() {
    let doc = "## Task 1.1: A\n## Task 1.2: B\n";
    let planner = Arc::new(Mutex::new(DispatchPlanner::initialize(&PlanSource {
        overview: String::new(),
        phase_docs: vec![(1, doc.to_string())],
    })));
    let pool = Arc::new(Mutex::new(WorkerPool::new(16)));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = AutoDispatcher::new(
        Arc::clone(&planner),
        Arc::clone(&pool),
        Arc::new(Mutex::new(OwnershipTracker::new())),
        tx,
        3,
        Duration::ZERO,
    );

    let dispatched = dispatcher.advance().await.unwrap();
    let _ = rx.try_recv(); // round request for the batch
    for tid in dispatched {
        let worker = {
            let mut p = planner.lock().await;
            let worker = p.get_task(tid).unwrap().assigned_to.clone().unwrap();
            p.mark_completed(tid).unwrap();
            worker
        };
        pool.lock().await.finish(&worker).unwrap();
    }

    {
        let p = planner.lock().await;
        let summary = p.state_summary();
        assert_eq!(summary.completed, summary.total);
        assert!(p.next_dispatchable(10).is_empty());
    }

    dispatcher.advance().await.unwrap();
    dispatcher.advance().await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), DispatchEvent::AllDone);
    assert!(rx.try_recv().is_err());
}

#[test]
fn crash_recovery_resumes_mid_plan() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("plan-state.json");

    {
        let mut planner = DispatchPlanner::initialize(&plan_source());
        planner.attach_store(SnapshotStore::new(&store_path));
        planner.mark_dispatched(id("1.1"), "backend").unwrap();
        planner.mark_completed(id("1.1")).unwrap();
        planner.mark_dispatched(id("1.2"), "backend").unwrap();
        // Process dies here.
    }

    let mut planner = DispatchPlanner::initialize(&plan_source());
    planner.attach_store(SnapshotStore::new(&store_path));

    assert!(planner.get_task(id("1.1")).unwrap().is_completed());
    assert_eq!(
        planner.get_task(id("1.2")).unwrap().assigned_to.as_deref(),
        Some("backend")
    );
    // 1.2 is already out; 2.1 still waits on it, so nothing dispatches.
    assert!(planner.next_dispatchable(10).is_empty());

    planner.mark_completed(id("1.2")).unwrap();
    let ready = planner.next_dispatchable(10);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, id("2.1"));
}

#[test]
fn malformed_plan_degrades_to_no_work() {
    let planner = DispatchPlanner::initialize(&PlanSource {
        overview: "no table here, only prose".to_string(),
        phase_docs: vec![(1, "also prose, no task markers".to_string())],
    });
    assert!(planner.next_dispatchable(10).is_empty());
    assert_eq!(planner.state_summary().total, 0);
}

#[tokio::test]
async fn coordinator_plan_drive_through() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(EchoRunner::new());
    let (mut coordinator, mut events) = Coordinator::new(
        test_config(&dir),
        &plan_source(),
        runner.clone(),
    )
    .unwrap();

    // Dispatch 1.1, run a round, signal completion; repeat down the chain.
    coordinator.advance().await.unwrap();
    let report = coordinator.run_round(false).await.unwrap();
    assert!(report.turns_run > 0);

    for (tid, worker) in [("1.1", "backend"), ("1.2", "backend"), ("2.1", "qa")] {
        coordinator
            .on_task_completed(id(tid), worker, "finished")
            .await
            .unwrap();
    }

    let summary = coordinator.state_summary().await;
    assert!(summary.all_complete());

    let mut saw_all_done = false;
    while let Ok(event) = events.dispatch.try_recv() {
        if event == DispatchEvent::AllDone {
            saw_all_done = true;
        }
    }
    assert!(saw_all_done);

    // Ownership for completed tasks was released.
    assert!(coordinator.ownership().lock().await.is_empty());
}
