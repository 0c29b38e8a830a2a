//! Trace-flow grouping and lint.
//!
//! A flow is the equivalence class of traces sharing the same structural
//! shape: span tree, kinds, services, operations, and the set of
//! logic-affecting attribute keys. Attributes that carry identifiers (IPs,
//! UUIDs, session ids) are excluded so two requests through the same code
//! path hash identically.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreResult;
use crate::models::attr::AttributeValue;
use crate::models::span::{Span, KIND_CLIENT};
use crate::scan::ScanBudget;
use crate::store::{IndexStore, KIND_TRACE};

/// Attribute keys that always shape a flow when present.
const LOGIC_KEYS: &[&str] = &[
    "http.method",
    "http.request.method",
    "http.route",
    "http.status_code",
    "rpc.service",
    "rpc.method",
    "rpc.grpc.status_code",
    "db.system",
    "db.operation",
    "messaging.system",
    "messaging.operation",
    "messaging.destination.name",
    "error",
];

/// Key suffixes that mark identifier-carrying attributes (`*.id`, `*.ip`, ...).
const IDENTIFIER_SUFFIXES: &[&str] = &[
    ".id",
    ".ip",
    ".address",
    ".user_agent",
    ".session",
    ".request_id",
    ".uuid",
];

static IDENTIFIER_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    // IPv4 (optional port), IPv6, UUID
    Regex::new(
        r"(?ix)^(?:
            (?:\d{1,3}\.){3}\d{1,3}(?::\d+)?
          | (?:[0-9a-f]{0,4}:){2,7}[0-9a-f]{0,4}
          | [0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}
        )$",
    )
    .expect("identifier regex must compile")
});

/// Whether an attribute key participates in the flow hash.
fn is_logic_affecting(key: &str, value: &AttributeValue) -> bool {
    if LOGIC_KEYS.contains(&key) {
        return true;
    }
    if IDENTIFIER_SUFFIXES.iter().any(|s| key.ends_with(s)) {
        return false;
    }
    if let AttributeValue::String(s) = value {
        if IDENTIFIER_VALUE_RE.is_match(s) {
            return false;
        }
    }
    true
}

/// Stable 128-bit flow hash over a trace's span tree, as lowercase hex.
///
/// Deterministic across span insertion order: spans are sorted by start
/// time, the tree is traversed pre-order with children ordered by
/// (name, start_time), and each node contributes
/// (depth, kind, service, operation, sorted logic-affecting keys).
pub fn flow_hash(spans: &[Span]) -> String {
    let mut ordered: Vec<&Span> = spans.iter().collect();
    ordered.sort_by_key(|s| (s.start_time_ns, s.span_id.clone()));

    let ids: HashMap<&str, ()> = ordered.iter().map(|s| (s.span_id.as_str(), ())).collect();
    let mut children: HashMap<&str, Vec<&Span>> = HashMap::new();
    let mut roots: Vec<&Span> = Vec::new();
    for &span in &ordered {
        // a missing parent makes the span a root
        if !span.parent_span_id.is_empty() && ids.contains_key(span.parent_span_id.as_str()) {
            children.entry(span.parent_span_id.as_str()).or_default().push(span);
        } else {
            roots.push(span);
        }
    }
    let order = |a: &&Span, b: &&Span| (&a.name, a.start_time_ns).cmp(&(&b.name, b.start_time_ns));
    roots.sort_by(order);
    for kids in children.values_mut() {
        kids.sort_by(order);
    }

    let mut shape: Vec<(usize, i32, String, String, Vec<String>)> = Vec::new();
    let mut stack: Vec<(usize, &Span)> = roots.iter().rev().map(|s| (0, *s)).collect();
    while let Some((depth, span)) = stack.pop() {
        let mut keys: Vec<String> = span
            .attributes
            .iter()
            .filter(|(k, v)| is_logic_affecting(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys.dedup();
        shape.push((
            depth,
            span.kind,
            span.service_name().to_string(),
            span.name.clone(),
            keys,
        ));
        if let Some(kids) = children.get(span.span_id.as_str()) {
            for kid in kids.iter().rev() {
                stack.push((depth + 1, kid));
            }
        }
    }

    let canonical = serde_json::to_string(&shape).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..16])
}

// ═══ Lint ═══

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintFinding {
    pub severity: Severity,
    pub category: String,
    pub span_name: String,
    pub message: String,
    pub suggestion: String,
}

/// Deprecated semantic-convention attribute names and their replacements.
const DEPRECATED_ATTRS: &[(&str, &str)] = &[
    ("http.url", "url.full"),
    ("http.host", "server.address"),
    ("http.user_agent", "user_agent.original"),
    ("net.peer.name", "server.address"),
    ("net.peer.ip", "network.peer.address"),
];

/// Run the lint rules over every span of a trace.
pub fn lint(spans: &[Span]) -> Vec<LintFinding> {
    let mut findings = Vec::new();

    for span in spans {
        let has_http = span.attributes.iter().any(|(k, _)| k.starts_with("http"));
        let has_method =
            span.attr("http.method").is_some() || span.attr("http.request.method").is_some();
        let has_status = span.attr("http.status_code").is_some()
            || span.attr("http.response.status_code").is_some();

        for (key, _) in &span.attributes {
            if key.contains('_') && !key.contains('.') {
                findings.push(LintFinding {
                    severity: Severity::Warning,
                    category: "naming".into(),
                    span_name: span.name.clone(),
                    message: format!(
                        "attribute {key:?} uses underscore instead of dot separator"
                    ),
                    suggestion: format!("rename to {:?}", key.replace('_', ".")),
                });
            }
            if let Some((_, replacement)) =
                DEPRECATED_ATTRS.iter().find(|(old, _)| old == key)
            {
                findings.push(LintFinding {
                    severity: Severity::Info,
                    category: "deprecated-semconv".into(),
                    span_name: span.name.clone(),
                    message: format!("attribute {key:?} is a deprecated semantic convention"),
                    suggestion: format!("use {replacement:?}"),
                });
            }
        }

        if has_http && !has_method {
            findings.push(LintFinding {
                severity: Severity::Warning,
                category: "http-semconv".into(),
                span_name: span.name.clone(),
                message: "HTTP-shaped span is missing the http.method family".into(),
                suggestion: "set http.request.method (or http.method)".into(),
            });
        }
        if span.kind == KIND_CLIENT && has_http && !has_status {
            findings.push(LintFinding {
                severity: Severity::Info,
                category: "http-semconv".into(),
                span_name: span.name.clone(),
                message: "HTTP client span has no http.status_code".into(),
                suggestion: "record the response status on the client span".into(),
            });
        }
    }

    findings
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    fn tally(findings: &[LintFinding]) -> Self {
        let mut counts = SeverityCounts::default();
        for f in findings {
            match f.severity {
                Severity::Error => counts.error += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub flow_hash: String,
    pub root_service: String,
    pub root_operation: String,
    pub trace_count: usize,
    pub severity_counts: SeverityCounts,
    pub example_trace_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowDetail {
    pub summary: FlowSummary,
    pub lint_result: Vec<LintFinding>,
    pub example_trace_ids: Vec<String>,
}

const EXAMPLES_PER_FLOW: usize = 5;

/// Group recent traces by flow hash. Lint runs once per flow on its first
/// example trace.
pub fn collect_flows(
    store: &IndexStore,
    since_ns: i64,
    until_ns: i64,
    limit: usize,
    budget: &mut ScanBudget,
) -> CoreResult<Vec<FlowSummary>> {
    let mut flows: Vec<FlowSummary> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    visit_traces(store, since_ns, until_ns, budget, |trace_id, spans| {
        let hash = flow_hash(spans);
        match index.get(&hash) {
            Some(&i) => {
                flows[i].trace_count += 1;
                if flows[i].example_trace_ids.len() < EXAMPLES_PER_FLOW {
                    flows[i].example_trace_ids.push(trace_id.to_string());
                }
            }
            None => {
                let root = root_span(spans);
                let findings = lint(spans);
                index.insert(hash.clone(), flows.len());
                flows.push(FlowSummary {
                    flow_hash: hash,
                    root_service: root.map(|s| s.service_name().to_string()).unwrap_or_default(),
                    root_operation: root.map(|s| s.name.clone()).unwrap_or_default(),
                    trace_count: 1,
                    severity_counts: SeverityCounts::tally(&findings),
                    example_trace_ids: vec![trace_id.to_string()],
                });
            }
        }
    })?;

    flows.sort_by(|a, b| {
        b.trace_count
            .cmp(&a.trace_count)
            .then_with(|| a.flow_hash.cmp(&b.flow_hash))
    });
    flows.truncate(limit);
    Ok(flows)
}

/// Find one flow by hash within the window and lint its first example trace.
pub fn flow_detail(
    store: &IndexStore,
    wanted_hash: &str,
    since_ns: i64,
    until_ns: i64,
    budget: &mut ScanBudget,
) -> CoreResult<Option<FlowDetail>> {
    let mut summary: Option<FlowSummary> = None;
    let mut findings: Vec<LintFinding> = Vec::new();

    visit_traces(store, since_ns, until_ns, budget, |trace_id, spans| {
        let hash = flow_hash(spans);
        if hash != wanted_hash {
            return;
        }
        match &mut summary {
            Some(s) => {
                s.trace_count += 1;
                if s.example_trace_ids.len() < EXAMPLES_PER_FLOW {
                    s.example_trace_ids.push(trace_id.to_string());
                }
            }
            None => {
                let root = root_span(spans);
                findings = lint(spans);
                summary = Some(FlowSummary {
                    flow_hash: hash,
                    root_service: root.map(|s| s.service_name().to_string()).unwrap_or_default(),
                    root_operation: root.map(|s| s.name.clone()).unwrap_or_default(),
                    trace_count: 1,
                    severity_counts: SeverityCounts::tally(&findings),
                    example_trace_ids: vec![trace_id.to_string()],
                });
            }
        }
    })?;

    Ok(summary.map(|summary| FlowDetail {
        example_trace_ids: summary.example_trace_ids.clone(),
        summary,
        lint_result: findings,
    }))
}

/// Lint one trace by id.
pub fn lint_trace(store: &IndexStore, trace_id: &str) -> CoreResult<Option<Vec<LintFinding>>> {
    let spans = store.range_by_trace(trace_id)?;
    if spans.is_empty() {
        return Ok(None);
    }
    Ok(Some(lint(&spans)))
}

fn root_span(spans: &[Span]) -> Option<&Span> {
    spans
        .iter()
        .filter(|s| s.parent_span_id.is_empty())
        .min_by_key(|s| s.start_time_ns)
        .or_else(|| spans.iter().min_by_key(|s| s.start_time_ns))
}

/// Walk recent traces newest-first, invoking `visit` with each trace's spans.
fn visit_traces(
    store: &IndexStore,
    since_ns: i64,
    until_ns: i64,
    budget: &mut ScanBudget,
    mut visit: impl FnMut(&str, &[Span]),
) -> CoreResult<()> {
    let mut after: Option<(i64, String)> = None;
    'scan: loop {
        let page = store.range_by_time(KIND_TRACE, since_ns, until_ns, after.as_ref(), 128, true)?;
        if page.is_empty() {
            break;
        }
        after = page.last().cloned();

        for (_, trace_id) in &page {
            let spans = store.range_by_trace(trace_id)?;
            if !budget.consume(1 + spans.len()) {
                break 'scan;
            }
            if spans.is_empty() {
                continue;
            }
            visit(trace_id, &spans);
        }
    }
    Ok(())
}
