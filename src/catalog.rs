//! Service catalog: per-service RED statistics over a rolling window.
//!
//! Streams server and consumer spans (inbound work) from the time-ordered
//! index and folds them into per-service rows. Latency percentiles come from
//! a fixed-size Algorithm R reservoir per service.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreResult;
use crate::models::span::{KIND_CONSUMER, KIND_SERVER};
use crate::scan::ScanBudget;
use crate::store::{IndexStore, KIND_SPAN};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRow {
    pub service_name: String,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub first_seen_ns: i64,
    pub last_seen_ns: i64,
}

/// Uniform sample of a duration stream (Algorithm R).
#[derive(Debug, Clone)]
pub struct Reservoir {
    cap: usize,
    seen: u64,
    samples: Vec<f64>,
}

impl Reservoir {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), seen: 0, samples: Vec::new() }
    }

    pub fn observe(&mut self, value: f64, rng: &mut impl Rng) {
        self.seen += 1;
        if self.samples.len() < self.cap {
            self.samples.push(value);
        } else {
            let j = rng.random_range(0..self.seen) as usize;
            if j < self.cap {
                self.samples[j] = value;
            }
        }
    }

    /// Nearest-rank percentile; `q` in (0, 1].
    pub fn percentile(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = (q * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    RequestCount,
    ErrorRate,
    P95,
    Name,
}

impl SortKey {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("error_rate") => SortKey::ErrorRate,
            Some("p95") => SortKey::P95,
            Some("name") => SortKey::Name,
            _ => SortKey::RequestCount,
        }
    }
}

struct Accumulator {
    request_count: u64,
    error_count: u64,
    reservoir: Reservoir,
    first_seen_ns: i64,
    last_seen_ns: i64,
}

/// Fold spans in `[since_ns, until_ns]` into catalog rows. Only server and
/// consumer spans count: they are the inbound work of a service.
pub fn build_service_catalog(
    store: &IndexStore,
    since_ns: i64,
    until_ns: i64,
    reservoir_size: usize,
    budget: &mut ScanBudget,
) -> CoreResult<Vec<CatalogRow>> {
    let mut acc: HashMap<String, Accumulator> = HashMap::new();
    let mut rng = rand::rng();

    let mut after: Option<(i64, String)> = None;
    'scan: loop {
        let page = store.range_by_time(KIND_SPAN, since_ns, until_ns, after.as_ref(), 512, true)?;
        if page.is_empty() {
            break;
        }
        after = page.last().cloned();

        for (_, span_id) in &page {
            if !budget.consume(1) {
                break 'scan;
            }
            let Some(span) = store.get_span(span_id)? else {
                continue;
            };
            if span.kind != KIND_SERVER && span.kind != KIND_CONSUMER {
                continue;
            }

            let entry = acc
                .entry(span.service_name().to_string())
                .or_insert_with(|| Accumulator {
                    request_count: 0,
                    error_count: 0,
                    reservoir: Reservoir::new(reservoir_size),
                    first_seen_ns: span.start_time_ns,
                    last_seen_ns: span.start_time_ns,
                });
            entry.request_count += 1;
            if span.is_error() {
                entry.error_count += 1;
            }
            entry.reservoir.observe(span.duration_ns as f64 / 1_000_000.0, &mut rng);
            entry.first_seen_ns = entry.first_seen_ns.min(span.start_time_ns);
            entry.last_seen_ns = entry.last_seen_ns.max(span.start_time_ns);
        }
    }

    let mut rows: Vec<CatalogRow> = acc
        .into_iter()
        .map(|(service_name, a)| CatalogRow {
            service_name,
            request_count: a.request_count,
            error_count: a.error_count,
            error_rate: a.error_count as f64 / a.request_count.max(1) as f64,
            p50_ms: a.reservoir.percentile(0.50),
            p95_ms: a.reservoir.percentile(0.95),
            p99_ms: a.reservoir.percentile(0.99),
            first_seen_ns: a.first_seen_ns,
            last_seen_ns: a.last_seen_ns,
        })
        .collect();
    sort_rows(&mut rows, SortKey::RequestCount);
    Ok(rows)
}

/// Default order is request_count descending; ties break on service_name
/// ascending for stability.
pub fn sort_rows(rows: &mut [CatalogRow], key: SortKey) {
    match key {
        SortKey::RequestCount => rows.sort_by(|a, b| {
            b.request_count
                .cmp(&a.request_count)
                .then_with(|| a.service_name.cmp(&b.service_name))
        }),
        SortKey::ErrorRate => rows.sort_by(|a, b| {
            b.error_rate
                .partial_cmp(&a.error_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.service_name.cmp(&b.service_name))
        }),
        SortKey::P95 => rows.sort_by(|a, b| {
            b.p95_ms
                .partial_cmp(&a.p95_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.service_name.cmp(&b.service_name))
        }),
        SortKey::Name => rows.sort_by(|a, b| a.service_name.cmp(&b.service_name)),
    }
}

/// Window-scoped cached build, mirroring the service-graph cache.
pub fn service_catalog_cached(
    store: &IndexStore,
    cache_ttl_s: u64,
    since_ns: i64,
    until_ns: i64,
    window_tag: &str,
    reservoir_size: usize,
    budget: &mut ScanBudget,
) -> CoreResult<Vec<CatalogRow>> {
    let cache_key = format!("catalog:{window_tag}");
    if let Some(bytes) = store.cache_get(&cache_key)? {
        if let Ok(rows) = serde_json::from_slice::<Vec<CatalogRow>>(&bytes) {
            return Ok(rows);
        }
    }
    let rows = build_service_catalog(store, since_ns, until_ns, reservoir_size, budget)?;
    if let Ok(bytes) = serde_json::to_vec(&rows) {
        store.cache_put(&cache_key, bytes, cache_ttl_s)?;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::span::{Span, KIND_CLIENT, STATUS_ERROR};
    use crate::serializer::Serializer;
    use crate::store::kv::Kv;
    use crate::test_support;
    use std::sync::Arc;

    fn store() -> IndexStore {
        IndexStore::new(Arc::new(Kv::new()), Serializer::new(512, 3), 60)
    }

    fn put(st: &IndexStore, span: &Span) {
        let bytes = st.serializer().encode(span).unwrap();
        let mut p = st.pipeline();
        p.put_record(KIND_SPAN, &span.span_id, bytes);
        p.add_to_timeline(KIND_SPAN, &span.span_id, span.start_time_ns);
        st.commit(p).unwrap();
    }

    fn budget() -> ScanBudget {
        ScanBudget::new(100_000, None)
    }

    #[test]
    fn red_row_for_checkout() {
        // 100 server spans: 5 errored; 50x1ms, 45x10ms, 5x100ms
        let st = store();
        for i in 0..100u64 {
            let mut s = test_support::span("checkout", KIND_SERVER);
            s.span_id = format!("{i:016x}");
            s.start_time_ns = 1_000 + i as i64;
            s.duration_ns = if i < 50 {
                1_000_000
            } else if i < 95 {
                10_000_000
            } else {
                100_000_000
            };
            if i < 5 {
                s.status_code = STATUS_ERROR;
            }
            put(&st, &s);
        }

        let rows = build_service_catalog(&st, 0, i64::MAX, 2048, &mut budget()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.service_name, "checkout");
        assert_eq!(row.request_count, 100);
        assert_eq!(row.error_count, 5);
        assert!((row.error_rate - 0.05).abs() < 1e-9);
        assert_eq!(row.p50_ms, 1.0);
        assert_eq!(row.p95_ms, 10.0);
        assert_eq!(row.p99_ms, 100.0);
        assert_eq!(row.first_seen_ns, 1_000);
        assert_eq!(row.last_seen_ns, 1_099);
    }

    #[test]
    fn client_spans_do_not_count_as_inbound_work() {
        let st = store();
        let mut s = test_support::span("api", KIND_CLIENT);
        s.span_id = "11".repeat(8);
        put(&st, &s);
        let rows = build_service_catalog(&st, 0, i64::MAX, 2048, &mut budget()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn consumer_spans_count() {
        let st = store();
        let mut s = test_support::span("billing", KIND_CONSUMER);
        s.span_id = "22".repeat(8);
        put(&st, &s);
        let rows = build_service_catalog(&st, 0, i64::MAX, 2048, &mut budget()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request_count, 1);
    }

    #[test]
    fn default_sort_and_tie_break() {
        let mut rows = vec![
            CatalogRow {
                service_name: "b".into(),
                request_count: 10,
                error_count: 0,
                error_rate: 0.0,
                p50_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                first_seen_ns: 0,
                last_seen_ns: 0,
            },
            CatalogRow { service_name: "a".into(), request_count: 10, ..row_zero() },
            CatalogRow { service_name: "c".into(), request_count: 99, ..row_zero() },
        ];
        sort_rows(&mut rows, SortKey::RequestCount);
        let names: Vec<&str> = rows.iter().map(|r| r.service_name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    fn row_zero() -> CatalogRow {
        CatalogRow {
            service_name: String::new(),
            request_count: 0,
            error_count: 0,
            error_rate: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            first_seen_ns: 0,
            last_seen_ns: 0,
        }
    }

    #[test]
    fn reservoir_caps_memory_and_keeps_percentiles_sane() {
        let mut r = Reservoir::new(64);
        let mut rng = rand::rng();
        for i in 0..10_000 {
            r.observe((i % 100) as f64, &mut rng);
        }
        assert_eq!(r.samples.len(), 64);
        let p50 = r.percentile(0.5);
        assert!((0.0..100.0).contains(&p50));
        assert!(r.percentile(0.99) >= p50);
    }

    #[test]
    fn empty_reservoir_is_zero() {
        let r = Reservoir::new(8);
        assert_eq!(r.percentile(0.5), 0.0);
    }
}
