//! Semantic index store.
//!
//! Everything the core persists goes through this façade: one authoritative
//! record copy per `<kind>:<id>` key plus the index entries that make it
//! reachable (by time, by trace, by service, by metric series). All writes
//! from one ingest payload are committed as a single pipelined batch.

pub mod kv;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::CoreResult;
use crate::models::log::LogRecord;
use crate::models::metric::{DataPoint, MetricEnvelope, SeriesIdentity};
use crate::models::span::Span;
use crate::serializer::Serializer;
use kv::{Kv, WriteOp};

/// Counter names exposed on the stats surface.
pub mod counters {
    pub const TRACES_RECORDS: &str = "ingest.traces.records";
    pub const LOGS_RECORDS: &str = "ingest.logs.records";
    pub const METRICS_POINTS: &str = "ingest.metrics.points";
    pub const SPANS_MALFORMED: &str = "ingest.spans.malformed";
    pub const NAMES_REJECTED: &str = "metrics.names.rejected";
    pub const DROPPED_BY_CARDINALITY: &str = "metrics.dropped_by_cardinality";
    pub const UNRESOLVED_PEER: &str = "graph.unresolved_peer";
    pub const RECORDS_CORRUPT: &str = "records.corrupt";
    pub const TTL_MISSING: &str = "ttl.missing";

    pub const ALL: &[&str] = &[
        TRACES_RECORDS,
        LOGS_RECORDS,
        METRICS_POINTS,
        SPANS_MALFORMED,
        NAMES_REJECTED,
        DROPPED_BY_CARDINALITY,
        UNRESOLVED_PEER,
        RECORDS_CORRUPT,
        TTL_MISSING,
    ];
}

/// Record kinds addressable by `<kind>:<id>`.
pub const KIND_SPAN: &str = "span";
pub const KIND_LOG: &str = "log";
pub const KIND_TRACE: &str = "trace";

pub struct IndexStore {
    kv: Arc<Kv>,
    ser: Serializer,
    ttl_s: u64,
}

/// Builder for one atomic ingest batch.
pub struct Pipeline {
    ops: Vec<WriteOp>,
    ttl_s: u64,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Store the single authoritative copy of a record.
    pub fn put_record(&mut self, kind: &str, id: &str, encoded: Vec<u8>) {
        self.ops.push(WriteOp::PutBytes {
            key: format!("{kind}:{id}"),
            bytes: encoded,
            ttl_s: self.ttl_s,
        });
    }

    /// Insert into the time-ordered index for a kind.
    pub fn add_to_timeline(&mut self, kind: &str, id: &str, timestamp_ns: i64) {
        self.ops.push(WriteOp::ZAdd {
            key: format!("idx:time:{kind}"),
            score: timestamp_ns,
            member: id.as_bytes().to_vec(),
            ttl_s: self.ttl_s,
        });
    }

    /// Insert a trace into the trace timeline, keeping the first-seen start
    /// time as the score so later spans don't reshuffle the listing.
    pub fn add_trace_to_timeline(&mut self, trace_id: &str, start_time_ns: i64) {
        self.ops.push(WriteOp::ZAddNx {
            key: format!("idx:time:{KIND_TRACE}"),
            score: start_time_ns,
            member: trace_id.as_bytes().to_vec(),
            ttl_s: self.ttl_s,
        });
    }

    /// Insert a span into its per-trace index, scored by start time.
    pub fn add_to_trace(&mut self, trace_id: &str, span_id: &str, start_time_ns: i64) {
        self.ops.push(WriteOp::ZAdd {
            key: format!("idx:trace:{trace_id}"),
            score: start_time_ns,
            member: span_id.as_bytes().to_vec(),
            ttl_s: self.ttl_s,
        });
    }

    /// Insert a log into its per-trace index.
    pub fn add_log_to_trace(&mut self, trace_id: &str, log_id: &str, time_ns: i64) {
        self.ops.push(WriteOp::ZAdd {
            key: format!("idx:tracelog:{trace_id}"),
            score: time_ns,
            member: log_id.as_bytes().to_vec(),
            ttl_s: self.ttl_s,
        });
    }

    /// Per-service ordered index.
    pub fn add_to_service(&mut self, service: &str, kind: &str, id: &str, timestamp_ns: i64) {
        self.ops.push(WriteOp::ZAdd {
            key: format!("idx:svc:{service}:{kind}"),
            score: timestamp_ns,
            member: id.as_bytes().to_vec(),
            ttl_s: self.ttl_s,
        });
        self.ops.push(WriteOp::ZAdd {
            key: "idx:services".to_string(),
            score: timestamp_ns,
            member: service.as_bytes().to_vec(),
            ttl_s: self.ttl_s,
        });
    }

    /// Append a point payload to a metric series, ordered by point time.
    pub fn add_to_metric_series(&mut self, series_key: &str, point_time_ns: i64, payload: Vec<u8>) {
        self.ops.push(WriteOp::ZAdd {
            key: format!("metrics:points:{series_key}"),
            score: point_time_ns,
            member: payload,
            ttl_s: self.ttl_s,
        });
    }

    /// Record name-level metric metadata.
    pub fn put_metric_meta(&mut self, name: &str, encoded: Vec<u8>) {
        self.ops.push(WriteOp::HSet {
            key: "metrics:meta".to_string(),
            field: name.to_string(),
            value: encoded,
            ttl_s: self.ttl_s,
        });
    }

    /// Register a series identity under its metric name.
    pub fn put_series_identity(&mut self, name: &str, series_key: &str, encoded: Vec<u8>) {
        self.ops.push(WriteOp::HSet {
            key: format!("metrics:series:{name}"),
            field: series_key.to_string(),
            value: encoded,
            ttl_s: self.ttl_s,
        });
    }

    /// Bump the per-trace marker so readers can tell a trace is live.
    pub fn mark_trace_seen(&mut self, trace_id: &str) {
        self.ops.push(WriteOp::Incr {
            key: format!("trace.seen:{trace_id}"),
            delta: 1,
            ttl_s: self.ttl_s,
        });
    }

    pub fn incr_counter(&mut self, name: &str, delta: i64) {
        self.ops.push(WriteOp::Incr {
            key: format!("ctr:{name}"),
            delta,
            ttl_s: self.ttl_s,
        });
    }
}

impl IndexStore {
    pub fn new(kv: Arc<Kv>, ser: Serializer, ttl_s: u64) -> Self {
        Self { kv, ser, ttl_s }
    }

    pub fn kv(&self) -> &Arc<Kv> {
        &self.kv
    }

    pub fn serializer(&self) -> &Serializer {
        &self.ser
    }

    pub fn record_ttl_s(&self) -> u64 {
        self.ttl_s
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline { ops: Vec::new(), ttl_s: self.ttl_s }
    }

    /// Commit a batch atomically. Nothing from the batch is visible on error.
    pub fn commit(&self, pipeline: Pipeline) -> CoreResult<()> {
        if pipeline.ops.is_empty() {
            return Ok(());
        }
        self.kv.apply(pipeline.ops)?;
        Ok(())
    }

    // ── Range reads ──

    /// Time-ordered ids of a kind within `[since_ns, until_ns]`. `after` is
    /// the exclusive continuation pair from a cursor.
    pub fn range_by_time(
        &self,
        kind: &str,
        since_ns: i64,
        until_ns: i64,
        after: Option<&(i64, String)>,
        limit: usize,
        reverse: bool,
    ) -> CoreResult<Vec<(i64, String)>> {
        let after_raw = after.map(|(s, id)| (*s, id.as_bytes().to_vec()));
        let rows = self.kv.zrange(
            &format!("idx:time:{kind}"),
            since_ns,
            until_ns,
            after_raw.as_ref(),
            limit,
            reverse,
        )?;
        Ok(decode_members(rows))
    }

    /// All spans of a trace ordered by start time. Records that expired out
    /// from under the index are skipped.
    pub fn range_by_trace(&self, trace_id: &str) -> CoreResult<Vec<Span>> {
        let rows = self.kv.zrange(
            &format!("idx:trace:{trace_id}"),
            i64::MIN,
            i64::MAX,
            None,
            usize::MAX,
            false,
        )?;
        let mut spans = Vec::with_capacity(rows.len());
        for (_, member) in rows {
            let id = String::from_utf8_lossy(&member).into_owned();
            if let Some(span) = self.get_span(&id)? {
                spans.push(span);
            }
        }
        Ok(spans)
    }

    /// Log ids correlated with a trace, ordered by time.
    pub fn range_logs_by_trace(&self, trace_id: &str) -> CoreResult<Vec<(i64, String)>> {
        let rows = self.kv.zrange(
            &format!("idx:tracelog:{trace_id}"),
            i64::MIN,
            i64::MAX,
            None,
            usize::MAX,
            false,
        )?;
        Ok(decode_members(rows))
    }

    pub fn range_by_service(
        &self,
        service: &str,
        kind: &str,
        since_ns: i64,
        until_ns: i64,
        after: Option<&(i64, String)>,
        limit: usize,
    ) -> CoreResult<Vec<(i64, String)>> {
        let after_raw = after.map(|(s, id)| (*s, id.as_bytes().to_vec()));
        let rows = self.kv.zrange(
            &format!("idx:svc:{service}:{kind}"),
            since_ns,
            until_ns,
            after_raw.as_ref(),
            limit,
            true,
        )?;
        Ok(decode_members(rows))
    }

    /// Points of one series within a window, ordered by time. Out-of-order
    /// inserts come back sorted because the index is score-ordered.
    pub fn range_metric_series(
        &self,
        series_key: &str,
        since_ns: i64,
        until_ns: i64,
    ) -> CoreResult<Vec<DataPoint>> {
        let rows = self.kv.zrange(
            &format!("metrics:points:{series_key}"),
            since_ns,
            until_ns,
            None,
            usize::MAX,
            false,
        )?;
        let mut points = Vec::with_capacity(rows.len());
        for (_, payload) in rows {
            if let Some(p) = self.decode_or_count::<DataPoint>(&payload)? {
                points.push(p);
            }
        }
        Ok(points)
    }

    // ── Record reads ──

    pub fn get_record(&self, kind: &str, id: &str) -> CoreResult<Option<Vec<u8>>> {
        self.kv.get_bytes(&format!("{kind}:{id}"))
    }

    pub fn get_span(&self, id: &str) -> CoreResult<Option<Span>> {
        match self.get_record(KIND_SPAN, id)? {
            Some(bytes) => self.decode_or_count(&bytes),
            None => Ok(None),
        }
    }

    pub fn get_log(&self, id: &str) -> CoreResult<Option<LogRecord>> {
        match self.get_record(KIND_LOG, id)? {
            Some(bytes) => self.decode_or_count(&bytes),
            None => Ok(None),
        }
    }

    /// Decode a stored record; a corrupt payload is skipped, counted and
    /// logged, never propagated.
    fn decode_or_count<T: DeserializeOwned>(&self, bytes: &[u8]) -> CoreResult<Option<T>> {
        match self.ser.decode(bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!("skipping corrupt record: {e}");
                self.incr_counter(counters::RECORDS_CORRUPT, 1)?;
                Ok(None)
            }
        }
    }

    // ── Metric metadata ──

    pub fn metric_meta(&self) -> CoreResult<Vec<(String, MetricEnvelope)>> {
        let rows = self.kv.hgetall("metrics:meta")?;
        let mut out = Vec::with_capacity(rows.len());
        for (name, bytes) in rows {
            if let Some(envelope) = self.decode_or_count(&bytes)? {
                out.push((name, envelope));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    pub fn series_of(&self, name: &str) -> CoreResult<Vec<(String, SeriesIdentity)>> {
        let rows = self.kv.hgetall(&format!("metrics:series:{name}"))?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, bytes) in rows {
            if let Some(identity) = self.decode_or_count(&bytes)? {
                out.push((key, identity));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    // ── Counters & caches ──

    pub fn incr_counter(&self, name: &str, delta: i64) -> CoreResult<()> {
        self.kv.incr(&format!("ctr:{name}"), delta, self.ttl_s)
    }

    pub fn get_counter(&self, name: &str) -> CoreResult<i64> {
        self.kv.counter(&format!("ctr:{name}"))
    }

    pub fn cache_get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        self.kv.get_bytes(&format!("cache:{key}"))
    }

    pub fn cache_put(&self, key: &str, bytes: Vec<u8>, ttl_s: u64) -> CoreResult<()> {
        self.kv.apply(vec![WriteOp::PutBytes {
            key: format!("cache:{key}"),
            bytes,
            ttl_s,
        }])?;
        Ok(())
    }

    // ── Stats ──

    pub fn span_count(&self) -> CoreResult<usize> {
        self.kv.count_prefix("span:")
    }

    pub fn log_count(&self) -> CoreResult<usize> {
        self.kv.count_prefix("log:")
    }

    pub fn trace_count(&self) -> CoreResult<usize> {
        self.kv.count_prefix("idx:trace:")
    }

    pub fn service_count(&self) -> CoreResult<usize> {
        self.kv.zcard("idx:services")
    }

    pub fn services(&self) -> CoreResult<Vec<String>> {
        let rows = self
            .kv
            .zrange("idx:services", i64::MIN, i64::MAX, None, usize::MAX, false)?;
        Ok(decode_members(rows).into_iter().map(|(_, s)| s).collect())
    }
}

fn decode_members(rows: Vec<(i64, Vec<u8>)>) -> Vec<(i64, String)> {
    rows.into_iter()
        .map(|(score, member)| (score, String::from_utf8_lossy(&member).into_owned()))
        .collect()
}
