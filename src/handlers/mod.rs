pub mod flows;
pub mod health;
pub mod ingest;
pub mod logs;
pub mod metrics;
pub mod services;
pub mod spans;
pub mod stats;
pub mod traces;

use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::models::now_unix_ns;

/// Query parameters shared by every read endpoint: a time window, a limit,
/// an opaque cursor, structured filters, and an optional deadline.
#[derive(Debug, Default, Deserialize)]
pub struct WindowParams {
    pub since_ns: Option<i64>,
    pub until_ns: Option<i64>,
    /// Lookback in seconds when `since_ns` is absent.
    pub window_s: Option<u64>,
    pub limit: Option<u64>,
    pub cursor: Option<String>,
    /// JSON-encoded array of `{field, op, value}` objects.
    pub filters: Option<String>,
    pub deadline_ms: Option<u64>,
}

impl WindowParams {
    /// Resolve the `[since, until]` window in nanoseconds.
    pub fn window(&self, default_window_s: u64) -> (i64, i64) {
        let until = self.until_ns.unwrap_or_else(now_unix_ns);
        let lookback = self.window_s.unwrap_or(default_window_s) as i64 * 1_000_000_000;
        let since = self.since_ns.unwrap_or(until.saturating_sub(lookback));
        (since, until)
    }

    /// Server-enforced limit cap: requests beyond the cap are rejected, not
    /// clamped.
    pub fn effective_limit(&self, max: u64) -> Result<usize, CoreError> {
        let limit = self.limit.unwrap_or(100);
        if limit > max {
            return Err(CoreError::LimitTooLarge { got: limit, max });
        }
        Ok(limit.max(1) as usize)
    }

    /// Continuation point decoded from the cursor.
    pub fn after(&self) -> Option<(i64, String)> {
        self.cursor.as_deref().and_then(crate::cursor::decode_cursor)
    }

    /// Tag identifying the window for the aggregator caches.
    pub fn window_tag(&self, default_window_s: u64) -> String {
        match (self.since_ns, self.until_ns) {
            (None, None) => format!("w{}", self.window_s.unwrap_or(default_window_s)),
            (since, until) => format!("{}-{}", since.unwrap_or(0), until.unwrap_or(0)),
        }
    }
}

/// The uniform pagination envelope, with the endpoint's named field carried
/// as an alias of `items`.
pub fn page_envelope(named: &str, items: Vec<Value>, next_cursor: Option<String>) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(named.to_string(), Value::Array(items.clone()));
    map.insert("items".to_string(), Value::Array(items));
    map.insert(
        "next_cursor".to_string(),
        next_cursor.clone().map(Value::String).unwrap_or(Value::Null),
    );
    map.insert("has_more".to_string(), Value::Bool(next_cursor.is_some()));
    Value::Object(map)
}

pub fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("request failed: {e}");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("request failed: {e}"))
}

/// Normalize a hex path identifier (trace id, flow hash) to lowercase,
/// rejecting anything that is not `hex_len` hex digits.
pub(crate) fn hex_path_id(raw: &str, hex_len: usize, what: &str) -> Result<String, (StatusCode, String)> {
    if raw.len() != hex_len || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("{what} {raw:?} is not {hex_len} hex digits"),
        ));
    }
    Ok(raw.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_above_cap_is_rejected() {
        let params = WindowParams { limit: Some(5000), ..Default::default() };
        assert!(matches!(
            params.effective_limit(1000),
            Err(CoreError::LimitTooLarge { got: 5000, max: 1000 })
        ));
        let params = WindowParams { limit: Some(1000), ..Default::default() };
        assert_eq!(params.effective_limit(1000).unwrap(), 1000);
    }

    #[test]
    fn window_defaults_to_lookback() {
        let params = WindowParams::default();
        let (since, until) = params.window(1800);
        assert_eq!(until - since, 1800 * 1_000_000_000);
    }

    #[test]
    fn explicit_window_wins() {
        let params = WindowParams {
            since_ns: Some(100),
            until_ns: Some(900),
            ..Default::default()
        };
        assert_eq!(params.window(1800), (100, 900));
    }

    #[test]
    fn hex_path_ids_normalize_or_reject() {
        let id = "AB".repeat(16);
        assert_eq!(hex_path_id(&id, 32, "trace_id").unwrap(), "ab".repeat(16));
        assert!(hex_path_id("abcd", 32, "trace_id").is_err());
        assert!(hex_path_id(&"zz".repeat(16), 32, "trace_id").is_err());
    }
}
