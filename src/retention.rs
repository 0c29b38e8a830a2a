//! Retention / TTL supervisor.
//!
//! Every stored key must carry a TTL; expiry itself is the engine's job.
//! This task periodically samples random keys to verify the invariant, and
//! reports store size and per-kind counts. A key without a TTL is an
//! invariant violation: structured error log plus the `ttl.missing` counter.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoreConfig;
use crate::store::kv::Kv;
use crate::store::{counters, IndexStore};

/// Spawn the supervisor as a background task (fire-and-forget).
pub fn spawn_ttl_supervisor(kv: Arc<Kv>, store: Arc<IndexStore>, config: Arc<CoreConfig>) {
    let interval_secs = config.ttl_check_interval_s;
    tokio::spawn(async move {
        tracing::info!("ttl supervisor: started (interval={interval_secs}s)");
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = check_once(&kv, &store, &config) {
                tracing::error!("ttl supervisor error: {e}");
            }
        }
    });
}

/// One supervisor pass: sample keys, verify TTLs, report sizes.
pub fn check_once(kv: &Kv, store: &IndexStore, config: &CoreConfig) -> crate::error::CoreResult<()> {
    let sample = kv.sample_keys(config.ttl_check_sample_size)?;
    let mut missing = 0usize;
    for (key, ttl) in &sample {
        if ttl.is_none() {
            missing += 1;
            tracing::error!(key = %key, "key stored without a ttl");
        }
    }
    if missing > 0 {
        store.incr_counter(counters::TTL_MISSING, missing as i64)?;
    }

    tracing::info!(
        keys = kv.key_count()?,
        spans = store.span_count()?,
        logs = store.log_count()?,
        traces = store.trace_count()?,
        memory_bytes = kv.approx_memory_bytes()?,
        sampled = sample.len(),
        ttl_missing = missing,
        "store report"
    );
    Ok(())
}
