use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "uptime_s": state.process.uptime_s() }))
}
