use serde::{Deserialize, Serialize};

use super::attr::{attrs_to_json, AttributeValue, Attributes, Resource, Scope};

/// A canonical log record. `trace_id`/`span_id` are present only when the
/// producer correlated the line with a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub time_ns: i64,
    pub observed_time_ns: Option<i64>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    /// OTEL severity number 1..=24, absent when the producer set none.
    pub severity_number: Option<i32>,
    pub severity_text: String,
    pub body: AttributeValue,
    pub attributes: Attributes,
    pub flags: u32,
    pub dropped_attributes_count: u32,
    pub resource: Resource,
    pub scope: Scope,
}

impl LogRecord {
    pub fn service_name(&self) -> &str {
        self.resource.service_name()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "time_ns": self.time_ns,
            "observed_time_ns": self.observed_time_ns,
            "trace_id": self.trace_id,
            "span_id": self.span_id,
            "severity_number": self.severity_number,
            "severity_text": self.severity_text,
            "severity": self.severity_number.map(severity_name),
            "service_name": self.service_name(),
            "body": self.body.to_json(),
            "attributes": attrs_to_json(&self.attributes),
            "flags": self.flags,
            "dropped_attributes_count": self.dropped_attributes_count,
            "resource": { "attributes": attrs_to_json(&self.resource.attributes) },
            "scope": { "name": self.scope.name, "version": self.scope.version },
        })
    }
}

/// OTEL severity buckets: 1-4 TRACE, 5-8 DEBUG, 9-12 INFO, 13-16 WARN,
/// 17-20 ERROR, 21-24 FATAL.
pub fn severity_name(n: i32) -> &'static str {
    match n {
        1..=4 => "TRACE",
        5..=8 => "DEBUG",
        9..=12 => "INFO",
        13..=16 => "WARN",
        17..=20 => "ERROR",
        21..=24 => "FATAL",
        _ => "UNSPECIFIED",
    }
}
