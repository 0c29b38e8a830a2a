use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{internal_error, WindowParams};
use crate::catalog::{service_catalog_cached, sort_rows, SortKey};
use crate::graph::{hide_services, service_graph_cached};
use crate::scan::ScanBudget;
use crate::AppState;

// ═══ Service map ═══

#[derive(Debug, Deserialize)]
pub struct MapParams {
    /// Comma-separated service names to hide from the returned graph
    /// (applied after construction; data is never filtered at ingest).
    pub hide: Option<String>,
}

/// `GET /api/v1/services/map`: the service-dependency graph over a window.
pub async fn service_map(
    State(state): State<AppState>,
    Query(window): Query<WindowParams>,
    Query(params): Query<MapParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (since, until) = window.window(state.config.record_ttl_s);
    let tag = window.window_tag(state.config.record_ttl_s);
    let mut budget = ScanBudget::new(state.config.scan_budget, window.deadline_ms);

    let graph = service_graph_cached(
        &state.store,
        state.config.service_graph_cache_ttl_s,
        since,
        until,
        &tag,
        &mut budget,
    )
    .map_err(internal_error)?;

    let hidden: Vec<String> = params
        .hide
        .as_deref()
        .map(|h| h.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let graph = hide_services(graph, &hidden);

    Ok(Json(json!({ "nodes": graph.nodes, "edges": graph.edges })))
}

// ═══ Service catalog ═══

#[derive(Debug, Deserialize)]
pub struct CatalogParams {
    /// `request_count` (default), `error_rate`, `p95` or `name`.
    pub sort: Option<String>,
}

/// `GET /api/v1/services/catalog`: RED rows per service over a window.
pub async fn service_catalog(
    State(state): State<AppState>,
    Query(window): Query<WindowParams>,
    Query(params): Query<CatalogParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (since, until) = window.window(state.config.record_ttl_s);
    let tag = window.window_tag(state.config.record_ttl_s);
    let mut budget = ScanBudget::new(state.config.scan_budget, window.deadline_ms);

    let mut rows = service_catalog_cached(
        &state.store,
        state.config.service_graph_cache_ttl_s,
        since,
        until,
        &tag,
        state.config.reservoir_size,
        &mut budget,
    )
    .map_err(internal_error)?;

    sort_rows(&mut rows, SortKey::parse(params.sort.as_deref()));
    let total_count = rows.len();

    Ok(Json(json!({ "services": rows, "total_count": total_count })))
}
