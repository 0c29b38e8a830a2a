use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use super::{internal_error, page_envelope, WindowParams};
use crate::cursor::encode_cursor;
use crate::models::query::{matches_all, parse_filters};
use crate::models::span::Span;
use crate::scan::ScanBudget;
use crate::store::KIND_TRACE;
use crate::AppState;

/// `GET /api/v1/traces`: recent trace summaries, newest first.
pub async fn list_traces(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (since, until) = params.window(state.config.record_ttl_s);
    let limit = params.effective_limit(state.config.query_max_limit).map_err(Into::<(StatusCode, String)>::into)?;
    let filters = parse_filters(params.filters.as_deref())
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let mut budget = ScanBudget::new(state.config.scan_budget, params.deadline_ms);

    let mut items: Vec<Value> = Vec::new();
    let mut after = params.after();
    let mut last_scanned: Option<(i64, String)> = None;
    let mut truncated = false;

    'scan: while items.len() < limit {
        let page = state
            .store
            .range_by_time(KIND_TRACE, since, until, after.as_ref(), 128, true)
            .map_err(internal_error)?;
        if page.is_empty() {
            break;
        }
        after = page.last().cloned();

        for pair in &page {
            let (_, trace_id) = pair;
            let spans = state.store.range_by_trace(trace_id).map_err(internal_error)?;
            if !budget.consume(1 + spans.len()) {
                truncated = true;
                break 'scan;
            }
            last_scanned = Some(pair.clone());
            if spans.is_empty() {
                continue;
            }
            if !filters.is_empty()
                && !spans.iter().any(|s| matches_all(&s.to_json(), &filters))
            {
                continue;
            }
            items.push(trace_summary(trace_id, &spans));
            if items.len() >= limit {
                break 'scan;
            }
        }
    }

    // a full page or a truncated scan yields a cursor; an exhausted timeline
    // does not
    let next_cursor = if truncated || items.len() >= limit {
        last_scanned.map(|(t, id)| encode_cursor(t, &id))
    } else {
        None
    };

    Ok(Json(page_envelope("traces", items, next_cursor)))
}

/// `GET /api/v1/traces/{trace_id}`: every span of one trace plus metadata.
pub async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trace_id = super::hex_path_id(&trace_id, 32, "trace_id")?;

    let spans = state.store.range_by_trace(&trace_id).map_err(internal_error)?;
    if spans.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            format!("no spans stored for trace {trace_id}"),
        ));
    }

    let mut services: Vec<String> = spans.iter().map(|s| s.service_name().to_string()).collect();
    services.sort();
    services.dedup();

    let start = spans.iter().map(|s| s.start_time_ns).min().unwrap_or(0);
    let end = spans.iter().map(|s| s.end_time_ns).max().unwrap_or(start);

    Ok(Json(json!({
        "trace_id": trace_id,
        "spans": spans.iter().map(Span::to_json).collect::<Vec<_>>(),
        "metadata": {
            "span_count": spans.len(),
            "start_time_ns": start,
            "duration_ns": (end - start).max(0),
            "services": services,
            "has_error": spans.iter().any(Span::is_error),
        },
    })))
}

/// One row of the recent-traces listing.
fn trace_summary(trace_id: &str, spans: &[Span]) -> Value {
    let root = spans
        .iter()
        .filter(|s| s.parent_span_id.is_empty())
        .min_by_key(|s| s.start_time_ns)
        .or_else(|| spans.iter().min_by_key(|s| s.start_time_ns));

    let start = spans.iter().map(|s| s.start_time_ns).min().unwrap_or(0);
    let end = spans.iter().map(|s| s.end_time_ns).max().unwrap_or(start);

    json!({
        "trace_id": trace_id,
        "root_service": root.map(|s| s.service_name().to_string()).unwrap_or_default(),
        "root_operation": root.map(|s| s.name.clone()).unwrap_or_default(),
        "start_time_ns": start,
        "duration_ns": (end - start).max(0),
        "span_count": spans.len(),
        "has_error": spans.iter().any(Span::is_error),
    })
}
