//! Scan budget shared by the read-path aggregators.
//!
//! Reads never fail on a slow scan: when the entry budget or the deadline
//! runs out, the caller returns the partial result with `has_more=true`.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ScanBudget {
    remaining: usize,
    deadline: Option<Instant>,
    exhausted: bool,
}

impl ScanBudget {
    pub fn new(max_entries: usize, deadline_ms: Option<u64>) -> Self {
        Self {
            remaining: max_entries,
            deadline: deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
            exhausted: false,
        }
    }

    /// Spend budget for `n` scanned entries. Returns false once the budget
    /// or the deadline is gone; the current batch should stop.
    pub fn consume(&mut self, n: usize) -> bool {
        if self.exhausted {
            return false;
        }
        if self.remaining < n {
            self.exhausted = true;
            return false;
        }
        self.remaining -= n;
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.exhausted = true;
                return false;
            }
        }
        true
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }
}
