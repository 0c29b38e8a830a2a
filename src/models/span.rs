use serde::{Deserialize, Serialize};

use super::attr::{attrs_to_json, AttributeValue, Attributes, Resource, Scope};

/// Span kind discriminants as they appear on the wire.
pub const KIND_UNSPECIFIED: i32 = 0;
pub const KIND_INTERNAL: i32 = 1;
pub const KIND_SERVER: i32 = 2;
pub const KIND_CLIENT: i32 = 3;
pub const KIND_PRODUCER: i32 = 4;
pub const KIND_CONSUMER: i32 = 5;

pub const STATUS_UNSET: i32 = 0;
pub const STATUS_OK: i32 = 1;
pub const STATUS_ERROR: i32 = 2;

/// A canonical span record. Identifiers are lowercase hex; times are Unix
/// nanoseconds. Immutable after ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    /// Empty when the span is a root.
    pub parent_span_id: String,
    pub name: String,
    pub kind: i32,
    pub start_time_ns: i64,
    pub end_time_ns: i64,
    pub duration_ns: i64,
    pub status_code: i32,
    pub status_message: String,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
    pub dropped_attributes_count: u32,
    pub dropped_events_count: u32,
    pub dropped_links_count: u32,
    pub resource: Resource,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub time_ns: i64,
    pub name: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    pub attributes: Attributes,
}

impl Span {
    pub fn service_name(&self) -> &str {
        self.resource.service_name()
    }

    pub fn operation_name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Error predicate shared by the graph builder and the catalog:
    /// status ERROR, `http.status_code` >= 500, or a nonzero gRPC status.
    pub fn is_error(&self) -> bool {
        if self.status_code == STATUS_ERROR {
            return true;
        }
        if let Some(code) = self.attr("http.status_code").and_then(AttributeValue::as_i64) {
            if code >= 500 {
                return true;
            }
        }
        if let Some(code) = self
            .attr("rpc.grpc.status_code")
            .and_then(AttributeValue::as_i64)
        {
            if code != 0 {
                return true;
            }
        }
        false
    }

    /// OTEL-shaped JSON for the read API.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "trace_id": self.trace_id,
            "span_id": self.span_id,
            "parent_span_id": self.parent_span_id,
            "name": self.name,
            "kind": self.kind,
            "service_name": self.service_name(),
            "start_time_ns": self.start_time_ns,
            "end_time_ns": self.end_time_ns,
            "duration_ns": self.duration_ns,
            "status_code": self.status_code,
            "status_message": self.status_message,
            "attributes": attrs_to_json(&self.attributes),
            "events": self.events.iter().map(|e| serde_json::json!({
                "time_ns": e.time_ns,
                "name": e.name,
                "attributes": attrs_to_json(&e.attributes),
            })).collect::<Vec<_>>(),
            "links": self.links.iter().map(|l| serde_json::json!({
                "trace_id": l.trace_id,
                "span_id": l.span_id,
                "attributes": attrs_to_json(&l.attributes),
            })).collect::<Vec<_>>(),
            "dropped_attributes_count": self.dropped_attributes_count,
            "dropped_events_count": self.dropped_events_count,
            "dropped_links_count": self.dropped_links_count,
            "resource": { "attributes": attrs_to_json(&self.resource.attributes) },
            "scope": { "name": self.scope.name, "version": self.scope.version },
        })
    }
}
