use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{internal_error, WindowParams};
use crate::flow::{collect_flows, flow_detail, lint_trace};
use crate::scan::ScanBudget;
use crate::AppState;

/// `GET /api/v1/flows`: trace flows over a window, grouped by flow hash.
pub async fn list_flows(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (since, until) = params.window(state.config.record_ttl_s);
    let limit = params.effective_limit(state.config.query_max_limit).map_err(Into::<(StatusCode, String)>::into)?;
    let mut budget = ScanBudget::new(state.config.scan_budget, params.deadline_ms);

    let flows = collect_flows(&state.store, since, until, limit, &mut budget)
        .map_err(internal_error)?;

    Ok(Json(json!({
        "flows": flows,
        "has_more": budget.exhausted(),
    })))
}

/// `GET /api/v1/flows/{flow_hash}`: one flow's summary, lint findings and
/// example traces.
pub async fn get_flow(
    State(state): State<AppState>,
    Path(flow_hash): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let flow_hash = super::hex_path_id(&flow_hash, 32, "flow_hash")?;
    let (since, until) = params.window(state.config.record_ttl_s);
    let mut budget = ScanBudget::new(state.config.scan_budget, params.deadline_ms);

    let detail = flow_detail(&state.store, &flow_hash, since, until, &mut budget)
        .map_err(internal_error)?;

    match detail {
        Some(d) => Ok(Json(json!({
            "summary": d.summary,
            "lint_result": d.lint_result,
            "example_trace_ids": d.example_trace_ids,
        }))),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("no trace in the window matches flow {flow_hash}"),
        )),
    }
}

/// `GET /api/v1/traces/{trace_id}/lint`: lint one trace directly.
pub async fn lint_one_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let trace_id = super::hex_path_id(&trace_id, 32, "trace_id")?;
    let findings = lint_trace(&state.store, &trace_id).map_err(internal_error)?;
    match findings {
        Some(findings) => Ok(Json(json!({ "trace_id": trace_id, "findings": findings }))),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("no spans stored for trace {trace_id}"),
        )),
    }
}
