//! OTLP/HTTP ingest endpoints (`POST /v1/{traces,logs,metrics}`).
//!
//! Thin shims over the core ingest functions: the payload arrives as decoded
//! JSON and the response carries the OTLP `partialSuccess` envelope plus the
//! partial-accept summary.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::ingest::{ingest_logs, ingest_metrics, ingest_traces, IngestReport};
use crate::AppState;

pub async fn post_traces(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let report = ingest_traces(&state.store, &payload).map_err(Into::<(StatusCode, String)>::into)?;
    Ok(Json(ingest_response("rejectedSpans", report)))
}

pub async fn post_logs(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let report = ingest_logs(&state.store, &payload).map_err(Into::<(StatusCode, String)>::into)?;
    Ok(Json(ingest_response("rejectedLogRecords", report)))
}

pub async fn post_metrics(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let report = ingest_metrics(&state.store, &state.guard, &payload).map_err(Into::<(StatusCode, String)>::into)?;
    Ok(Json(ingest_response("rejectedDataPoints", report)))
}

fn ingest_response(rejected_field: &str, report: IngestReport) -> Value {
    let partial_success = if report.skipped == 0 {
        Value::Null
    } else {
        let mut map = serde_json::Map::new();
        map.insert(rejected_field.to_string(), json!(report.skipped));
        map.insert("errorMessage".to_string(), json!(report.reasons.join("; ")));
        Value::Object(map)
    };
    json!({
        "partialSuccess": partial_success,
        "accepted": report.accepted,
        "skipped": report.skipped,
        "reasons": report.reasons,
    })
}
