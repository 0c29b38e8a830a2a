//! Cardinality guard for metric-name identities.
//!
//! The known-name set lives in the store under a single key so the
//! check-and-add is one atomic engine operation; the set's TTL refreshes on
//! every accepted access, so it survives exactly as long as metrics keep
//! arriving.

use std::sync::Arc;

use serde::Serialize;

use crate::error::CoreResult;
use crate::store::counters;
use crate::store::kv::{Kv, WriteOutcome};

const NAMES_KEY: &str = "metrics:names";

/// Exposed thresholds for UI warnings; the guard never enforces them.
pub const WARN_YELLOW: f64 = 0.70;
pub const WARN_RED: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Name already known, or inserted below the ceiling.
    Accepted,
    /// Ceiling reached and the name is new: the envelope must be dropped.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardinalityState {
    pub known: usize,
    pub limit: usize,
    pub rejected_total: i64,
    pub warn_level: &'static str,
}

pub struct CardinalityGuard {
    kv: Arc<Kv>,
    ceiling: usize,
    ttl_s: u64,
}

impl CardinalityGuard {
    pub fn new(kv: Arc<Kv>, ceiling: usize, ttl_s: u64) -> Self {
        Self { kv, ceiling, ttl_s }
    }

    /// Atomic check-and-add. Known names are accepted as a no-op (but still
    /// refresh the set TTL); new names are accepted while the set is below
    /// the ceiling and rejected once it is full.
    pub fn register_metric_name(&self, name: &str) -> CoreResult<RegisterOutcome> {
        match self.kv.sadd_capped(NAMES_KEY, name, self.ceiling, self.ttl_s)? {
            WriteOutcome::SetAdded | WriteOutcome::SetPresent => Ok(RegisterOutcome::Accepted),
            WriteOutcome::SetRejected => {
                self.kv
                    .incr(&format!("ctr:{}", counters::NAMES_REJECTED), 1, self.ttl_s)?;
                Ok(RegisterOutcome::Rejected)
            }
            WriteOutcome::Done => Ok(RegisterOutcome::Accepted),
        }
    }

    /// Live count of known names (`metrics.names.count`). Reported from the
    /// set itself so TTL expiry is observable.
    pub fn known_count(&self) -> CoreResult<usize> {
        self.kv.scard(NAMES_KEY)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn state(&self) -> CoreResult<CardinalityState> {
        let known = self.known_count()?;
        let rejected_total = self.kv.counter(&format!("ctr:{}", counters::NAMES_REJECTED))?;
        let ratio = known as f64 / self.ceiling.max(1) as f64;
        let warn_level = if ratio >= WARN_RED {
            "red"
        } else if ratio >= WARN_YELLOW {
            "yellow"
        } else {
            "ok"
        };
        Ok(CardinalityState { known, limit: self.ceiling, rejected_total, warn_level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(ceiling: usize) -> CardinalityGuard {
        CardinalityGuard::new(Arc::new(Kv::new()), ceiling, 60)
    }

    #[test]
    fn accepts_until_ceiling_then_rejects_new_names() {
        let g = guard(3);
        for name in ["a", "b", "c"] {
            assert_eq!(g.register_metric_name(name).unwrap(), RegisterOutcome::Accepted);
        }
        assert_eq!(g.register_metric_name("d").unwrap(), RegisterOutcome::Rejected);
        // known names stay accepted at the ceiling
        assert_eq!(g.register_metric_name("a").unwrap(), RegisterOutcome::Accepted);
        assert_eq!(g.known_count().unwrap(), 3);
    }

    #[test]
    fn known_count_never_exceeds_ceiling() {
        let g = guard(5);
        for i in 0..50 {
            let _ = g.register_metric_name(&format!("m{i}")).unwrap();
        }
        assert!(g.known_count().unwrap() <= 5);
        let state = g.state().unwrap();
        assert_eq!(state.known, 5);
        assert_eq!(state.rejected_total, 45);
        assert_eq!(state.warn_level, "red");
    }

    #[test]
    fn set_survives_only_while_names_arrive() {
        let g = CardinalityGuard::new(Arc::new(Kv::new()), 10, 1);
        g.register_metric_name("a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(g.known_count().unwrap(), 0);
        // after expiry the guard accepts fresh names again
        assert_eq!(g.register_metric_name("b").unwrap(), RegisterOutcome::Accepted);
    }
}
