use serde_json::Value;

use super::{decode_resource, decode_scope, IngestReport};
use crate::codec;
use crate::error::CoreResult;
use crate::models::attr::{AttributeValue, Resource, Scope};
use crate::models::log::LogRecord;
use crate::store::{counters, IndexStore, KIND_LOG};

/// Ingest one OTLP log payload. Logs have no wire-level id, so each record
/// gets a generated 8-byte lowercase-hex id for storage and pagination.
pub fn ingest_logs(store: &IndexStore, payload: &Value) -> CoreResult<IngestReport> {
    let blocks = super::resource_blocks(payload, "resource_logs", "resourceLogs")?;

    let mut report = IngestReport::default();
    let mut pipeline = store.pipeline();

    for block in blocks {
        if !block.is_object() {
            tracing::warn!("skipping malformed resource block in log payload");
            report.skip("malformed resource block");
            continue;
        }
        let resource = decode_resource(block);

        for scope_block in codec::field(block, "scope_logs", "scopeLogs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let scope = decode_scope(scope_block);

            for raw in codec::field(scope_block, "log_records", "logRecords")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                match decode_log(raw, &resource, &scope) {
                    Ok(log) => {
                        let id = codec::encode_id(&rand::random::<[u8; 8]>());
                        let encoded = store.serializer().encode(&log)?;
                        let service = log.service_name().to_string();

                        pipeline.put_record(KIND_LOG, &id, encoded);
                        pipeline.add_to_timeline(KIND_LOG, &id, log.time_ns);
                        if let Some(trace_id) = &log.trace_id {
                            pipeline.add_log_to_trace(trace_id, &id, log.time_ns);
                        }
                        if service != "unknown" {
                            pipeline.add_to_service(&service, KIND_LOG, &id, log.time_ns);
                        }
                        report.accepted += 1;
                    }
                    Err(e) => {
                        tracing::warn!("skipping log record: {e}");
                        report.skip(e.to_string());
                    }
                }
            }
        }
    }

    if report.accepted > 0 {
        pipeline.incr_counter(counters::LOGS_RECORDS, report.accepted as i64);
    }
    store.commit(pipeline)?;
    Ok(report)
}

fn decode_log(raw: &Value, resource: &Resource, scope: &Scope) -> CoreResult<LogRecord> {
    // correlation ids are optional on logs; a malformed one fails the record
    let trace_id = match codec::field(raw, "trace_id", "traceId") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => Some(codec::decode_trace_id(v)?),
    };
    let span_id = match codec::field(raw, "span_id", "spanId") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => Some(codec::decode_span_id(v)?),
    };

    let time_ns = codec::parse_ns(codec::field(raw, "time_unix_nano", "timeUnixNano"));
    let observed = codec::parse_ns(codec::field(raw, "observed_time_unix_nano", "observedTimeUnixNano"));

    let severity_number = match codec::parse_u32(raw, "severity_number", "severityNumber") {
        0 => None,
        n => Some(n as i32),
    };

    Ok(LogRecord {
        // producers that set no timestamp still need a timeline position
        time_ns: if time_ns > 0 { time_ns } else { observed },
        observed_time_ns: (observed > 0).then_some(observed),
        trace_id,
        span_id,
        severity_number,
        severity_text: codec::parse_str(raw, "severity_text", "severityText"),
        body: codec::field(raw, "body", "body")
            .map(codec::decode_value)
            .unwrap_or(AttributeValue::Null),
        attributes: codec::decode_attributes(codec::field(raw, "attributes", "attributes")),
        flags: codec::parse_u32(raw, "flags", "flags"),
        dropped_attributes_count: codec::parse_u32(
            raw,
            "dropped_attributes_count",
            "droppedAttributesCount",
        ),
        resource: resource.clone(),
        scope: scope.clone(),
    })
}
