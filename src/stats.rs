//! Admin/stats surface: per-signal counts, cardinality state, uptime,
//! store memory, and the exposed counters with their rates.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cardinality::{CardinalityGuard, CardinalityState};
use crate::error::CoreResult;
use crate::store::{counters, IndexStore};

pub struct ProcessStats {
    started: Instant,
}

impl Default for ProcessStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStats {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }

    pub fn uptime_s(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

#[derive(Debug, Serialize)]
pub struct CounterStat {
    pub name: String,
    pub value: i64,
    /// Average per-second rate over process uptime.
    pub rate_per_s: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub trace_count: usize,
    pub span_count: usize,
    pub log_count: usize,
    pub metric_name_count: usize,
    pub metric_name_limit: usize,
    pub metrics_dropped: i64,
    pub service_count: usize,
    pub uptime_s: u64,
    pub store_memory_bytes: u64,
    pub cardinality: CardinalityState,
    pub counters: Vec<CounterStat>,
}

/// Thread-safe read-only snapshot of the core's state.
pub fn snapshot(
    store: &IndexStore,
    guard: &CardinalityGuard,
    process: &Arc<ProcessStats>,
) -> CoreResult<StatsResponse> {
    let uptime_s = process.uptime_s();
    let elapsed = uptime_s.max(1) as f64;

    let mut counter_stats = Vec::with_capacity(counters::ALL.len() + 1);
    for name in counters::ALL {
        let value = store.get_counter(name)?;
        counter_stats.push(CounterStat {
            name: (*name).to_string(),
            value,
            rate_per_s: value as f64 / elapsed,
        });
    }
    // metrics.names.count is read live from the guard so TTL expiry shows up
    let known = guard.known_count()?;
    counter_stats.push(CounterStat {
        name: "metrics.names.count".to_string(),
        value: known as i64,
        rate_per_s: known as f64 / elapsed,
    });

    Ok(StatsResponse {
        trace_count: store.trace_count()?,
        span_count: store.span_count()?,
        log_count: store.log_count()?,
        metric_name_count: known,
        metric_name_limit: guard.ceiling(),
        metrics_dropped: store.get_counter(counters::DROPPED_BY_CARDINALITY)?,
        service_count: store.service_count()?,
        uptime_s,
        store_memory_bytes: store.kv().approx_memory_bytes()?,
        cardinality: guard.state()?,
        counters: counter_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Serializer;
    use crate::store::kv::Kv;
    use crate::store::KIND_SPAN;
    use crate::test_support;

    #[test]
    fn snapshot_reflects_store_contents() {
        let kv = Arc::new(Kv::new());
        let store = IndexStore::new(kv.clone(), Serializer::new(512, 3), 60);
        let guard = CardinalityGuard::new(kv, 10, 60);
        let process = Arc::new(ProcessStats::new());

        let span = test_support::span("api", crate::models::span::KIND_SERVER);
        let bytes = store.serializer().encode(&span).unwrap();
        let mut p = store.pipeline();
        p.put_record(KIND_SPAN, &span.span_id, bytes);
        p.add_to_trace(&span.trace_id, &span.span_id, span.start_time_ns);
        p.add_to_service("api", KIND_SPAN, &span.span_id, span.start_time_ns);
        store.commit(p).unwrap();
        guard.register_metric_name("cpu.load").unwrap();

        let s = snapshot(&store, &guard, &process).unwrap();
        assert_eq!(s.span_count, 1);
        assert_eq!(s.trace_count, 1);
        assert_eq!(s.service_count, 1);
        assert_eq!(s.metric_name_count, 1);
        assert_eq!(s.metric_name_limit, 10);
        assert!(s.store_memory_bytes > 0);
        assert!(s.counters.iter().any(|c| c.name == "metrics.names.count" && c.value == 1));
    }
}
