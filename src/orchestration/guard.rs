//! Per-turn runaway protection.
//!
//! A turn is forced to stop when it chains too many tool invocations, when
//! it keeps issuing the identical call (an infinite loop), or when the same
//! operation keeps failing the same way. Call history is a bounded ring so
//! a long turn never grows the detector.

use crate::{hlog_warn, Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

/// Identical-failure repetitions tolerated before the turn is cut off.
const MAX_IDENTICAL_FAILURES: u8 = 3;

pub struct TurnGuard {
    depth: usize,
    depth_limit: usize,
    recent_calls: VecDeque<u64>,
    repeat_window: usize,
    failures: HashMap<(String, String), u8>,
}

impl TurnGuard {
    pub fn new(depth_limit: usize, repeat_window: usize) -> Self {
        Self {
            depth: 0,
            depth_limit,
            recent_calls: VecDeque::with_capacity(repeat_window),
            repeat_window: repeat_window.max(2),
            failures: HashMap::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Record one chained call. Errors when the depth limit is exceeded or
    /// the last `repeat_window` calls were all identical.
    pub fn record_call(&mut self, signature: &str) -> Result<()> {
        self.depth += 1;
        if self.depth > self.depth_limit {
            hlog_warn!("turn depth limit {} exceeded", self.depth_limit);
            return Err(Error::TurnAborted(format!(
                "depth limit of {} chained calls exceeded, checkpoint and stop",
                self.depth_limit
            )));
        }

        let mut hasher = DefaultHasher::new();
        signature.hash(&mut hasher);
        let sig = hasher.finish();

        if self.recent_calls.len() == self.repeat_window {
            self.recent_calls.pop_front();
        }
        self.recent_calls.push_back(sig);

        let looping = self.recent_calls.len() == self.repeat_window
            && self.recent_calls.iter().all(|s| *s == sig);
        if looping {
            hlog_warn!("identical call repeated {} times: {}", self.repeat_window, signature);
            return Err(Error::TurnAborted(format!(
                "the same call was issued {} times in a row: {}",
                self.repeat_window, signature
            )));
        }
        Ok(())
    }

    /// Record a failed operation. The same (operation, error) pair failing
    /// three times ends the turn with a summary instead of retrying forever.
    pub fn record_failure(&mut self, operation: &str, error: &str) -> Result<()> {
        let count = self
            .failures
            .entry((operation.to_string(), error.to_string()))
            .or_insert(0);
        *count += 1;
        if *count >= MAX_IDENTICAL_FAILURES {
            hlog_warn!("{} failed {} times with: {}", operation, count, error);
            return Err(Error::TurnAborted(format!(
                "{} failed {} times with the same error ({}), giving up on this approach",
                operation, count, error
            )));
        }
        Ok(())
    }
}
