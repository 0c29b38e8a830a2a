//! OTLP payload ingestors.
//!
//! Each entry point walks the resource → scope → item nesting, normalizes
//! records through the codec, and commits every write from the payload as one
//! pipelined batch. Acceptance is best-effort per resource block: a malformed
//! record is skipped, counted and reported, never fatal to the payload.

pub mod logs;
pub mod metrics;
pub mod traces;

use serde::Serialize;
use serde_json::Value;

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::models::attr::{Resource, Scope};

pub use logs::ingest_logs;
pub use metrics::ingest_metrics;
pub use traces::ingest_traces;

/// Partial-accept summary returned alongside a successful ingest.
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub skipped: usize,
    pub reasons: Vec<String>,
}

impl IngestReport {
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skipped += 1;
        let reason = reason.into();
        // keep the summary bounded; the counter carries the true total
        if self.reasons.len() < 16 {
            self.reasons.push(reason);
        }
    }
}

/// Pull the top-level resource list (`resourceSpans` etc.) out of a payload.
/// A payload that is not an object, or whose list is not an array, is
/// malformed; an absent list is an empty payload and accepts zero records.
pub(crate) fn resource_blocks<'a>(
    payload: &'a Value,
    snake: &str,
    camel: &str,
) -> CoreResult<&'a [Value]> {
    if !payload.is_object() {
        return Err(CoreError::MalformedPayload(
            "payload is not a JSON object".into(),
        ));
    }
    match codec::field(payload, snake, camel) {
        None => Ok(&[]),
        Some(Value::Array(blocks)) => Ok(blocks),
        Some(_) => Err(CoreError::MalformedPayload(format!("{snake} is not an array"))),
    }
}

pub(crate) fn decode_resource(block: &Value) -> Resource {
    let resource = codec::field(block, "resource", "resource");
    Resource {
        attributes: codec::decode_attributes(
            resource.and_then(|r| codec::field(r, "attributes", "attributes")),
        ),
        dropped_attributes_count: resource
            .map(|r| codec::parse_u32(r, "dropped_attributes_count", "droppedAttributesCount"))
            .unwrap_or(0),
    }
}

pub(crate) fn decode_scope(block: &Value) -> Scope {
    let scope = codec::field(block, "scope", "scope");
    Scope {
        name: scope.map(|s| codec::parse_str(s, "name", "name")).unwrap_or_default(),
        version: scope
            .map(|s| codec::parse_str(s, "version", "version"))
            .unwrap_or_default(),
        attributes: codec::decode_attributes(
            scope.and_then(|s| codec::field(s, "attributes", "attributes")),
        ),
    }
}
