use serde_json::Value;

use super::{decode_resource, IngestReport};
use crate::cardinality::{CardinalityGuard, RegisterOutcome};
use crate::codec;
use crate::error::CoreResult;
use crate::models::metric::{
    series_key, DataPoint, Exemplar, MetricEnvelope, MetricType, PointValue, SeriesIdentity,
    Temporality,
};
use crate::store::{counters, IndexStore};

/// Ingest one OTLP metric payload. Every envelope passes the cardinality
/// guard first; a rejected name drops the whole envelope and counts it.
/// The accepted count is data points.
pub fn ingest_metrics(
    store: &IndexStore,
    guard: &CardinalityGuard,
    payload: &Value,
) -> CoreResult<IngestReport> {
    let blocks = super::resource_blocks(payload, "resource_metrics", "resourceMetrics")?;

    let mut report = IngestReport::default();
    let mut pipeline = store.pipeline();

    for block in blocks {
        if !block.is_object() {
            tracing::warn!("skipping malformed resource block in metric payload");
            report.skip("malformed resource block");
            continue;
        }
        let resource = decode_resource(block);

        for scope_block in codec::field(block, "scope_metrics", "scopeMetrics")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            for raw in codec::field(scope_block, "metrics", "metrics")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                let name = codec::parse_str(raw, "name", "name");
                if name.is_empty() {
                    report.skip("metric without a name");
                    continue;
                }

                // the guard gate is atomic and happens before any write for
                // this envelope
                if guard.register_metric_name(&name)? == RegisterOutcome::Rejected {
                    tracing::warn!(metric = %name, "dropping metric envelope: cardinality ceiling");
                    store.incr_counter(counters::DROPPED_BY_CARDINALITY, 1)?;
                    report.skip(format!("cardinality ceiling: {name}"));
                    continue;
                }

                let Some((envelope, points)) = decode_metric(raw, &name) else {
                    report.skip(format!("unrecognized metric shape: {name}"));
                    continue;
                };

                pipeline.put_metric_meta(&name, store.serializer().encode(&envelope)?);

                for point in points {
                    let key = series_key(&name, &resource.attributes, &point.attributes);
                    let identity = SeriesIdentity {
                        metric_name: name.clone(),
                        resource_attributes: resource.attributes.clone(),
                        point_attributes: point.attributes.clone(),
                    };
                    pipeline.put_series_identity(&name, &key, store.serializer().encode(&identity)?);
                    pipeline.add_to_metric_series(
                        &key,
                        point.time_ns,
                        store.serializer().encode(&point)?,
                    );
                    report.accepted += 1;
                }
            }
        }
    }

    if report.accepted > 0 {
        pipeline.incr_counter(counters::METRICS_POINTS, report.accepted as i64);
    }
    store.commit(pipeline)?;
    Ok(report)
}

/// Split a metric body into its envelope and data points. Returns `None`
/// when none of the five type blocks is present.
fn decode_metric(raw: &Value, name: &str) -> Option<(MetricEnvelope, Vec<DataPoint>)> {
    let description = codec::parse_str(raw, "description", "description");
    let unit = codec::parse_str(raw, "unit", "unit");

    let (metric_type, body) = if let Some(b) = codec::field(raw, "gauge", "gauge") {
        (MetricType::Gauge, b)
    } else if let Some(b) = codec::field(raw, "sum", "sum") {
        (MetricType::Sum, b)
    } else if let Some(b) = codec::field(raw, "histogram", "histogram") {
        (MetricType::Histogram, b)
    } else if let Some(b) = codec::field(raw, "exponential_histogram", "exponentialHistogram") {
        (MetricType::ExponentialHistogram, b)
    } else if let Some(b) = codec::field(raw, "summary", "summary") {
        (MetricType::Summary, b)
    } else {
        return None;
    };

    let temporality = (metric_type == MetricType::Sum).then(|| {
        match codec::parse_u32(body, "aggregation_temporality", "aggregationTemporality") {
            1 => Temporality::Delta,
            2 => Temporality::Cumulative,
            _ => Temporality::Unspecified,
        }
    });
    let is_monotonic = (metric_type == MetricType::Sum).then(|| {
        codec::field(body, "is_monotonic", "isMonotonic")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    });

    let envelope = MetricEnvelope {
        name: name.to_string(),
        description,
        unit,
        metric_type,
        temporality,
        is_monotonic,
    };

    let points = codec::field(body, "data_points", "dataPoints")
        .and_then(Value::as_array)
        .map(|dps| {
            dps.iter()
                .filter_map(|dp| decode_point(dp, metric_type))
                .collect()
        })
        .unwrap_or_default();

    Some((envelope, points))
}

fn decode_point(dp: &Value, metric_type: MetricType) -> Option<DataPoint> {
    let value = match metric_type {
        MetricType::Gauge | MetricType::Sum => PointValue::Number(number_value(dp)?),
        MetricType::Histogram | MetricType::ExponentialHistogram => PointValue::Histogram {
            count: parse_u64(codec::field(dp, "count", "count")),
            sum: codec::field(dp, "sum", "sum").and_then(Value::as_f64),
            bucket_counts: codec::field(dp, "bucket_counts", "bucketCounts")
                .and_then(Value::as_array)
                .map(|bs| bs.iter().map(|b| parse_u64(Some(b))).collect())
                .unwrap_or_default(),
            explicit_bounds: codec::field(dp, "explicit_bounds", "explicitBounds")
                .and_then(Value::as_array)
                .map(|bs| bs.iter().filter_map(Value::as_f64).collect())
                .unwrap_or_default(),
            min: codec::field(dp, "min", "min").and_then(Value::as_f64),
            max: codec::field(dp, "max", "max").and_then(Value::as_f64),
        },
        MetricType::Summary => PointValue::Summary {
            count: parse_u64(codec::field(dp, "count", "count")),
            sum: codec::field(dp, "sum", "sum").and_then(Value::as_f64).unwrap_or(0.0),
            quantiles: codec::field(dp, "quantile_values", "quantileValues")
                .and_then(Value::as_array)
                .map(|qs| {
                    qs.iter()
                        .map(|q| {
                            (
                                codec::field(q, "quantile", "quantile")
                                    .and_then(Value::as_f64)
                                    .unwrap_or(0.0),
                                codec::field(q, "value", "value")
                                    .and_then(Value::as_f64)
                                    .unwrap_or(0.0),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
        },
    };

    let exemplars = codec::field(dp, "exemplars", "exemplars")
        .and_then(Value::as_array)
        .map(|exs| {
            exs.iter()
                .map(|ex| Exemplar {
                    time_ns: codec::parse_ns(codec::field(ex, "time_unix_nano", "timeUnixNano")),
                    value: number_value(ex).unwrap_or(0.0),
                    trace_id: codec::field(ex, "trace_id", "traceId")
                        .and_then(|v| codec::decode_trace_id(v).ok()),
                    span_id: codec::field(ex, "span_id", "spanId")
                        .and_then(|v| codec::decode_span_id(v).ok()),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(DataPoint {
        attributes: codec::decode_attributes(codec::field(dp, "attributes", "attributes")),
        start_time_ns: codec::parse_ns(codec::field(dp, "start_time_unix_nano", "startTimeUnixNano")),
        time_ns: codec::parse_ns(codec::field(dp, "time_unix_nano", "timeUnixNano")),
        value,
        exemplars,
    })
}

/// Numeric sample: `asDouble` or `asInt` (the int arrives as a string).
fn number_value(dp: &Value) -> Option<f64> {
    if let Some(d) = codec::field(dp, "as_double", "asDouble").and_then(Value::as_f64) {
        return Some(d);
    }
    codec::field(dp, "as_int", "asInt").map(|v| match v {
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn parse_u64(v: Option<&Value>) -> u64 {
    match v {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Serializer;
    use crate::store::kv::Kv;
    use serde_json::json;
    use std::sync::Arc;

    fn setup(ceiling: usize) -> (IndexStore, CardinalityGuard) {
        let kv = Arc::new(Kv::new());
        let store = IndexStore::new(kv.clone(), Serializer::new(512, 3), 60);
        let guard = CardinalityGuard::new(kv, ceiling, 60);
        (store, guard)
    }

    fn gauge_payload(name: &str, value: f64, time_ns: i64) -> Value {
        json!({
            "resourceMetrics": [{
                "resource": {
                    "attributes": [
                        {"key": "service.name", "value": {"stringValue": "api"}}
                    ]
                },
                "scopeMetrics": [{
                    "metrics": [{
                        "name": name,
                        "unit": "1",
                        "gauge": {
                            "dataPoints": [{
                                "attributes": [{"key": "path", "value": {"stringValue": "/a"}}],
                                "timeUnixNano": time_ns.to_string(),
                                "asDouble": value
                            }]
                        }
                    }]
                }]
            }]
        })
    }

    #[test]
    fn gauge_points_land_in_series() {
        let (st, guard) = setup(10);
        let report = ingest_metrics(&st, &guard, &gauge_payload("cpu.load", 0.5, 1000)).unwrap();
        assert_eq!(report.accepted, 1);

        let meta = st.metric_meta().unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].0, "cpu.load");
        assert_eq!(meta[0].1.metric_type, MetricType::Gauge);

        let series = st.series_of("cpu.load").unwrap();
        assert_eq!(series.len(), 1);
        let points = st.range_metric_series(&series[0].0, 0, i64::MAX).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, PointValue::Number(0.5));
        assert_eq!(st.get_counter(counters::METRICS_POINTS).unwrap(), 1);
    }

    #[test]
    fn cardinality_cap_drops_new_envelopes() {
        // ceiling 3: a, b, c accepted; d dropped; re-ingesting a is a no-op
        let (st, guard) = setup(3);
        for (name, t) in [("a", 1), ("b", 2), ("c", 3), ("d", 4), ("a", 5)] {
            ingest_metrics(&st, &guard, &gauge_payload(name, 1.0, t)).unwrap();
        }
        assert_eq!(guard.known_count().unwrap(), 3);
        assert_eq!(st.get_counter(counters::DROPPED_BY_CARDINALITY).unwrap(), 1);
        assert!(st.series_of("a").unwrap().len() == 1);
        assert!(st.series_of("d").unwrap().is_empty());
        // both ingests of `a` landed in the same series
        let series = st.series_of("a").unwrap();
        let points = st.range_metric_series(&series[0].0, 0, i64::MAX).unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn sum_envelope_carries_temporality() {
        let (st, guard) = setup(10);
        let payload = json!({
            "resourceMetrics": [{
                "scopeMetrics": [{
                    "metrics": [{
                        "name": "requests.total",
                        "sum": {
                            "aggregationTemporality": 2,
                            "isMonotonic": true,
                            "dataPoints": [{"timeUnixNano": "10", "asInt": "7"}]
                        }
                    }]
                }]
            }]
        });
        ingest_metrics(&st, &guard, &payload).unwrap();
        let meta = st.metric_meta().unwrap();
        assert_eq!(meta[0].1.temporality, Some(Temporality::Cumulative));
        assert_eq!(meta[0].1.is_monotonic, Some(true));

        let series = st.series_of("requests.total").unwrap();
        let points = st.range_metric_series(&series[0].0, 0, i64::MAX).unwrap();
        assert_eq!(points[0].value, PointValue::Number(7.0));
    }

    #[test]
    fn histogram_points_decode() {
        let (st, guard) = setup(10);
        let payload = json!({
            "resourceMetrics": [{
                "scopeMetrics": [{
                    "metrics": [{
                        "name": "latency",
                        "histogram": {
                            "dataPoints": [{
                                "timeUnixNano": "10",
                                "count": "3",
                                "sum": 42.0,
                                "bucketCounts": ["1", "2"],
                                "explicitBounds": [5.0]
                            }]
                        }
                    }]
                }]
            }]
        });
        ingest_metrics(&st, &guard, &payload).unwrap();
        let series = st.series_of("latency").unwrap();
        let points = st.range_metric_series(&series[0].0, 0, i64::MAX).unwrap();
        match &points[0].value {
            PointValue::Histogram { count, sum, bucket_counts, explicit_bounds, .. } => {
                assert_eq!(*count, 3);
                assert_eq!(*sum, Some(42.0));
                assert_eq!(bucket_counts, &vec![1, 2]);
                assert_eq!(explicit_bounds, &vec![5.0]);
            }
            other => panic!("expected histogram, got {other:?}"),
        }
    }

    #[test]
    fn zero_points_registers_name_without_series() {
        let (st, guard) = setup(10);
        let payload = json!({
            "resourceMetrics": [{
                "scopeMetrics": [{
                    "metrics": [{"name": "empty.metric", "gauge": {"dataPoints": []}}]
                }]
            }]
        });
        let report = ingest_metrics(&st, &guard, &payload).unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(guard.known_count().unwrap(), 1);
        assert!(st.series_of("empty.metric").unwrap().is_empty());
    }

    #[test]
    fn same_name_different_attrs_is_one_identity_many_series() {
        let (st, guard) = setup(1);
        ingest_metrics(&st, &guard, &gauge_payload("m", 1.0, 1)).unwrap();
        let mut other = gauge_payload("m", 2.0, 2);
        other["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0]["gauge"]["dataPoints"][0]
            ["attributes"][0]["value"] = json!({"stringValue": "/b"});
        ingest_metrics(&st, &guard, &other).unwrap();
        // one name, two series, no cardinality drop
        assert_eq!(guard.known_count().unwrap(), 1);
        assert_eq!(st.series_of("m").unwrap().len(), 2);
        assert_eq!(st.get_counter(counters::DROPPED_BY_CARDINALITY).unwrap(), 0);
    }
}
