//! Shared fixtures: canned plan documents and a scripted turn runner.

use async_trait::async_trait;
use hive::{PlanSource, Result, TurnOutput, TurnRunner};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const OVERVIEW: &str = "\
# Build Plan

| Phase | Title | Status | Steps |
|-------|-------|--------|-------|
| 1 | Foundations | in progress | 2 |
| 2 | Integration | not started | 1 |
";

pub const PHASE_ONE: &str = "\
# Phase 1

## Task 1.1: Storage layer
@agent: backend
@depends: none

**Goal:** Persist records to disk.

**Files:**
- src/storage.rs

**Requirements:**
- Define the record struct
- Write save and load

## Task 1.2: HTTP API
@agent: backend
@depends: 1.1
@done_when: endpoints respond

**Goal:** Expose storage over HTTP.
";

pub const PHASE_TWO: &str = "\
# Phase 2

## Task 2.1: End-to-end check
@agent: qa
@depends: 1.2

**Goal:** Verify the whole flow.
";

pub fn plan_source() -> PlanSource {
    PlanSource {
        overview: OVERVIEW.to_string(),
        phase_docs: vec![
            (1, PHASE_ONE.to_string()),
            (2, PHASE_TWO.to_string()),
        ],
    }
}

/// Runner whose turns always succeed with a short transcript.
pub struct EchoRunner {
    pub calls: AtomicUsize,
}

impl EchoRunner {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TurnRunner for EchoRunner {
    async fn run_turn(&self, worker: &str, _context: &[String]) -> Result<TurnOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TurnOutput {
            text: format!("{} made progress", worker),
        })
    }
}
