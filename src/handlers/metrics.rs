use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{internal_error, page_envelope, WindowParams};
use crate::cursor::{decode_cursor, encode_cursor};
use crate::models::attr::attrs_to_json;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    /// Restrict the listing to one metric name.
    pub metric_name: Option<String>,
}

/// `GET /api/v1/metrics`: metric envelopes with their series and points in
/// the window. Paginates over metric names (the cursor is the last name).
pub async fn list_metrics(
    State(state): State<AppState>,
    Query(window): Query<WindowParams>,
    Query(params): Query<MetricsParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (since, until) = window.window(state.config.record_ttl_s);
    let limit = window
        .effective_limit(state.config.query_max_limit)
        .map_err(Into::<(StatusCode, String)>::into)?;
    let after_name = window
        .cursor
        .as_deref()
        .and_then(decode_cursor)
        .map(|(_, name)| name);

    let meta = state.store.metric_meta().map_err(internal_error)?;

    let mut items: Vec<Value> = Vec::new();
    let mut last_name: Option<String> = None;
    let mut has_more = false;

    for (name, envelope) in meta {
        if let Some(ref wanted) = params.metric_name {
            if &name != wanted {
                continue;
            }
        }
        if let Some(ref after) = after_name {
            if name.as_str() <= after.as_str() {
                continue;
            }
        }
        if items.len() >= limit {
            has_more = true;
            break;
        }

        let series = state.store.series_of(&name).map_err(internal_error)?;
        let mut series_json = Vec::with_capacity(series.len());
        for (series_key, identity) in series {
            let points = state
                .store
                .range_metric_series(&series_key, since, until)
                .map_err(internal_error)?;
            if points.is_empty() {
                continue;
            }
            series_json.push(json!({
                "series_key": series_key,
                "attrs": attrs_to_json(&identity.point_attributes),
                "resource_attrs": attrs_to_json(&identity.resource_attributes),
                "points": points.iter().map(|p| p.to_json()).collect::<Vec<_>>(),
            }));
        }

        last_name = Some(name.clone());
        items.push(json!({
            "envelope": {
                "name": envelope.name,
                "description": envelope.description,
                "unit": envelope.unit,
                "type": envelope.metric_type,
                "temporality": envelope.temporality,
                "is_monotonic": envelope.is_monotonic,
            },
            "series": series_json,
        }));
    }

    let next_cursor = if has_more {
        last_name.map(|n| encode_cursor(0, &n))
    } else {
        None
    };

    Ok(Json(page_envelope("metrics", items, next_cursor)))
}
