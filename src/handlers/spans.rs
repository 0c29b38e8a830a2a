use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;

use super::{internal_error, page_envelope, WindowParams};
use crate::cursor::encode_cursor;
use crate::models::query::{matches_all, parse_filters, Filter};
use crate::scan::ScanBudget;
use crate::store::{IndexStore, KIND_SPAN};
use crate::AppState;

/// `GET /api/v1/spans`: recent spans, newest first, filterable.
pub async fn list_spans(
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
        KIND_SPAN,
        since,
        until,
        params.after(),
        limit,
        &filters,
        &mut budget,
        |store, id| Ok(store.get_span(id)?.map(|s| s.to_json())),
    )
    .map_err(internal_error)?;

    Ok(Json(page_envelope("spans", items, next_cursor)))
}

/// Shared record pager: walk a timeline newest-first, load each record,
/// apply filters, stop at the limit or when the budget runs out.
#[allow(clippy::too_many_arguments)]
pub(crate) fn page_records(
    store: &IndexStore,
    kind: &str,
    since: i64,
    until: i64,
    mut after: Option<(i64, String)>,
    limit: usize,
    filters: &[Filter],
    budget: &mut ScanBudget,
    load: impl Fn(&IndexStore, &str) -> crate::error::CoreResult<Option<Value>>,
) -> crate::error::CoreResult<(Vec<Value>, Option<String>)> {
    let mut items: Vec<Value> = Vec::new();
    let mut last_scanned: Option<(i64, String)> = None;
    let mut truncated = false;

    'scan: while items.len() < limit {
        let page = store.range_by_time(kind, since, until, after.as_ref(), 256, true)?;
        if page.is_empty() {
            break;
        }
        after = page.last().cloned();

        for pair in &page {
            if !budget.consume(1) {
                truncated = true;
                break 'scan;
            }
            last_scanned = Some(pair.clone());
            let Some(record) = load(store, &pair.1)? else {
                continue;
            };
            if !filters.is_empty() && !matches_all(&record, filters) {
                continue;
            }
            items.push(record);
            if items.len() >= limit {
                break 'scan;
            }
        }
    }

    let next_cursor = if truncated || items.len() >= limit {
        last_scanned.map(|(t, id)| encode_cursor(t, &id))
    } else {
        None
    };
    Ok((items, next_cursor))
}
