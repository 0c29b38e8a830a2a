use serde_json::Value;

use super::{decode_resource, decode_scope, IngestReport};
use crate::codec;
use crate::error::CoreResult;
use crate::models::attr::{Resource, Scope};
use crate::models::span::{Span, SpanEvent, SpanLink};
use crate::store::{counters, IndexStore, KIND_SPAN};

/// Ingest one OTLP trace payload. All writes commit as a single batch; spans
/// with malformed ids are skipped and counted, the rest of the payload lands.
pub fn ingest_traces(store: &IndexStore, payload: &Value) -> CoreResult<IngestReport> {
    let blocks = super::resource_blocks(payload, "resource_spans", "resourceSpans")?;

    let mut report = IngestReport::default();
    let mut pipeline = store.pipeline();

    for block in blocks {
        if !block.is_object() {
            tracing::warn!("skipping malformed resource block in trace payload");
            report.skip("malformed resource block");
            continue;
        }
        let resource = decode_resource(block);

        for scope_block in codec::field(block, "scope_spans", "scopeSpans")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let scope = decode_scope(scope_block);

            for raw in codec::field(scope_block, "spans", "spans")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                match decode_span(raw, &resource, &scope) {
                    Ok(span) => {
                        let encoded = store.serializer().encode(&span)?;
                        let service = span.service_name().to_string();

                        pipeline.put_record(KIND_SPAN, &span.span_id, encoded);
                        pipeline.add_to_timeline(KIND_SPAN, &span.span_id, span.start_time_ns);
                        pipeline.add_to_trace(&span.trace_id, &span.span_id, span.start_time_ns);
                        pipeline.add_to_service(
                            &service,
                            KIND_SPAN,
                            &span.span_id,
                            span.start_time_ns,
                        );
                        pipeline.add_trace_to_timeline(&span.trace_id, span.start_time_ns);
                        pipeline.mark_trace_seen(&span.trace_id);
                        report.accepted += 1;
                    }
                    Err(e) => {
                        tracing::warn!("skipping span: {e}");
                        pipeline.incr_counter(counters::SPANS_MALFORMED, 1);
                        report.skip(e.to_string());
                    }
                }
            }
        }
    }

    if report.accepted > 0 {
        pipeline.incr_counter(counters::TRACES_RECORDS, report.accepted as i64);
    }
    store.commit(pipeline)?;
    Ok(report)
}

fn decode_span(raw: &Value, resource: &Resource, scope: &Scope) -> CoreResult<Span> {
    let trace_id = codec::decode_trace_id(
        codec::field(raw, "trace_id", "traceId").unwrap_or(&Value::Null),
    )?;
    let span_id =
        codec::decode_span_id(codec::field(raw, "span_id", "spanId").unwrap_or(&Value::Null))?;

    // a missing parent means the span is a root
    let parent_span_id = match codec::field(raw, "parent_span_id", "parentSpanId") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) if s.is_empty() => String::new(),
        Some(v) => codec::decode_span_id(v)?,
    };

    let start_time_ns = codec::parse_ns(codec::field(raw, "start_time_unix_nano", "startTimeUnixNano"));
    let end_time_ns = codec::parse_ns(codec::field(raw, "end_time_unix_nano", "endTimeUnixNano"));

    let status = codec::field(raw, "status", "status");
    let status_code = status
        .map(|s| codec::parse_u32(s, "code", "code") as i32)
        .unwrap_or(0);
    let status_message = status
        .map(|s| codec::parse_str(s, "message", "message"))
        .unwrap_or_default();

    let events = codec::field(raw, "events", "events")
        .and_then(Value::as_array)
        .map(|evs| {
            evs.iter()
                .map(|ev| SpanEvent {
                    time_ns: codec::parse_ns(codec::field(ev, "time_unix_nano", "timeUnixNano")),
                    name: codec::parse_str(ev, "name", "name"),
                    attributes: codec::decode_attributes(codec::field(ev, "attributes", "attributes")),
                })
                .collect()
        })
        .unwrap_or_default();

    // links with undecodable ids are dropped; they never fail the span
    let links = codec::field(raw, "links", "links")
        .and_then(Value::as_array)
        .map(|ls| {
            ls.iter()
                .filter_map(|l| {
                    let trace_id = codec::decode_trace_id(
                        codec::field(l, "trace_id", "traceId").unwrap_or(&Value::Null),
                    )
                    .ok()?;
                    let span_id = codec::decode_span_id(
                        codec::field(l, "span_id", "spanId").unwrap_or(&Value::Null),
                    )
                    .ok()?;
                    Some(SpanLink {
                        trace_id,
                        span_id,
                        attributes: codec::decode_attributes(codec::field(l, "attributes", "attributes")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Span {
        trace_id,
        span_id,
        parent_span_id,
        name: codec::parse_str(raw, "name", "name"),
        kind: codec::parse_u32(raw, "kind", "kind") as i32,
        start_time_ns,
        end_time_ns,
        duration_ns: (end_time_ns - start_time_ns).max(0),
        status_code,
        status_message,
        attributes: codec::decode_attributes(codec::field(raw, "attributes", "attributes")),
        events,
        links,
        dropped_attributes_count: codec::parse_u32(raw, "dropped_attributes_count", "droppedAttributesCount"),
        dropped_events_count: codec::parse_u32(raw, "dropped_events_count", "droppedEventsCount"),
        dropped_links_count: codec::parse_u32(raw, "dropped_links_count", "droppedLinksCount"),
        resource: resource.clone(),
        scope: scope.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Serializer;
    use crate::store::kv::Kv;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> IndexStore {
        IndexStore::new(Arc::new(Kv::new()), Serializer::new(512, 3), 60)
    }

    fn trace_payload(spans: Vec<Value>) -> Value {
        json!({
            "resourceSpans": [{
                "resource": {
                    "attributes": [
                        {"key": "service.name", "value": {"stringValue": "checkout"}}
                    ]
                },
                "scopeSpans": [{
                    "scope": {"name": "lib", "version": "1.0"},
                    "spans": spans
                }]
            }]
        })
    }

    fn span_json(trace_id: &str, span_id: &str) -> Value {
        json!({
            "traceId": trace_id,
            "spanId": span_id,
            "name": "GET /cart",
            "kind": 2,
            "startTimeUnixNano": "1000",
            "endTimeUnixNano": "3000",
            "status": {"code": 0},
            "attributes": [{"key": "http.route", "value": {"stringValue": "/cart"}}]
        })
    }

    #[test]
    fn spans_land_under_every_index() {
        let st = store();
        let trace_id = "a1".repeat(16);
        let payload = trace_payload(vec![span_json(&trace_id, &"b2".repeat(8))]);
        let report = ingest_traces(&st, &payload).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.skipped, 0);

        let spans = st.range_by_trace(&trace_id).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].service_name(), "checkout");
        assert_eq!(spans[0].duration_ns, 2000);
        assert_eq!(
            st.range_by_service("checkout", KIND_SPAN, 0, i64::MAX, None, 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(st.get_counter(counters::TRACES_RECORDS).unwrap(), 1);
    }

    #[test]
    fn dual_spelling_spans_decode_identically() {
        let st = store();
        let trace_id = "ab".repeat(16);
        let camel = span_json(&trace_id, &"01".repeat(8));
        let snake = json!({
            "trace_id": trace_id,
            "span_id": "02".repeat(8),
            "name": "GET /cart",
            "kind": 2,
            "start_time_unix_nano": "1000",
            "end_time_unix_nano": "3000",
            "status": {"code": 0},
            "attributes": [{"key": "http.route", "value": {"string_value": "/cart"}}]
        });
        let report = ingest_traces(&st, &trace_payload(vec![camel, snake])).unwrap();
        assert_eq!(report.accepted, 2);

        let spans = st.range_by_trace(&trace_id).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].attributes, spans[1].attributes);
    }

    #[test]
    fn malformed_id_skips_span_not_payload() {
        let st = store();
        let trace_id = "cd".repeat(16);
        let good = span_json(&trace_id, &"03".repeat(8));
        let mut bad = span_json(&trace_id, "deadbeef"); // 4 bytes, not 8
        bad["spanId"] = json!("deadbeef");
        let report = ingest_traces(&st, &trace_payload(vec![bad, good])).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(st.get_counter(counters::SPANS_MALFORMED).unwrap(), 1);
    }

    #[test]
    fn base64_ids_normalize_to_lowercase_hex() {
        use base64::Engine;
        let st = store();
        let trace_bytes = [0xABu8; 16];
        let span_bytes = [0x0Fu8; 8];
        let payload = trace_payload(vec![json!({
            "traceId": base64::engine::general_purpose::STANDARD.encode(trace_bytes),
            "spanId": base64::engine::general_purpose::STANDARD.encode(span_bytes),
            "name": "op",
            "kind": 1,
            "startTimeUnixNano": "1",
            "endTimeUnixNano": "2",
        })]);
        ingest_traces(&st, &payload).unwrap();
        let spans = st.range_by_trace(&"ab".repeat(16)).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].span_id, "0f".repeat(8));
    }

    #[test]
    fn missing_parent_is_root() {
        let st = store();
        let payload = trace_payload(vec![span_json(&"ef".repeat(16), &"04".repeat(8))]);
        ingest_traces(&st, &payload).unwrap();
        let spans = st.range_by_trace(&"ef".repeat(16)).unwrap();
        assert_eq!(spans[0].parent_span_id, "");
    }

    #[test]
    fn empty_payload_is_ok() {
        let st = store();
        let report = ingest_traces(&st, &json!({})).unwrap();
        assert_eq!(report.accepted, 0);
    }

    #[test]
    fn reingest_same_payload_is_idempotent() {
        let st = store();
        let trace_id = "9a".repeat(16);
        let payload = trace_payload(vec![span_json(&trace_id, &"05".repeat(8))]);
        ingest_traces(&st, &payload).unwrap();
        ingest_traces(&st, &payload).unwrap();
        assert_eq!(st.range_by_trace(&trace_id).unwrap().len(), 1);
        assert_eq!(st.span_count().unwrap(), 1);
    }
}
