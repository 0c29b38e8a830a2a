//! Shared fixtures for unit tests.

use crate::models::attr::{AttributeValue, Attributes, Resource, Scope};
use crate::models::span::{Span, STATUS_UNSET};

/// Build a minimal span for the given service and kind.
pub fn span(service: &str, kind: i32) -> Span {
    Span {
        trace_id: "a".repeat(32),
        span_id: "b".repeat(16),
        parent_span_id: String::new(),
        name: "op".into(),
        kind,
        start_time_ns: 1_000,
        end_time_ns: 2_000,
        duration_ns: 1_000,
        status_code: STATUS_UNSET,
        status_message: String::new(),
        attributes: vec![],
        events: vec![],
        links: vec![],
        dropped_attributes_count: 0,
        dropped_events_count: 0,
        dropped_links_count: 0,
        resource: Resource {
            attributes: vec![(
                "service.name".to_string(),
                AttributeValue::String(service.to_string()),
            )],
            dropped_attributes_count: 0,
        },
        scope: Scope::default(),
    }
}

/// Same span with attributes attached.
pub fn span_with_attrs(service: &str, kind: i32, attrs: Attributes) -> Span {
    let mut s = span(service, kind);
    s.attributes = attrs;
    s
}

/// String attribute pair shorthand.
pub fn attr(key: &str, value: &str) -> (String, AttributeValue) {
    (key.to_string(), AttributeValue::String(value.to_string()))
}
