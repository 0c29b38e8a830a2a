use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use super::internal_error;
use crate::stats::snapshot;
use crate::AppState;

/// `GET /api/v1/stats`: counts per signal, cardinality state, uptime,
/// store memory, and the counter table.
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let response =
        snapshot(&state.store, &state.guard, &state.process).map_err(internal_error)?;
    Ok(Json(response))
}
