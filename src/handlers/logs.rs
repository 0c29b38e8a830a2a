use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::spans::page_records;
use super::{internal_error, page_envelope, WindowParams};
use crate::models::query::parse_filters;
use crate::scan::ScanBudget;
use crate::store::KIND_LOG;
use crate::AppState;

/// `GET /api/v1/logs`: recent logs, newest first. `trace_id` and
/// `severity` filter through the structured filter parameter.
pub async fn list_logs(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (since, until) = params.window(state.config.record_ttl_s);
    let limit = params.effective_limit(state.config.query_max_limit).map_err(Into::<(StatusCode, String)>::into)?;
    let filters = parse_filters(params.filters.as_deref())
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let mut budget = ScanBudget::new(state.config.scan_budget, params.deadline_ms);

    let (items, next_cursor) = page_records(
        &state.store,
        KIND_LOG,
        since,
        until,
        params.after(),
        limit,
        &filters,
        &mut budget,
        |store, id| Ok(store.get_log(id)?.map(|l| l.to_json())),
    )
    .map_err(internal_error)?;

    Ok(Json(page_envelope("logs", items, next_cursor)))
}
