use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::attr::{attr_hash, attrs_to_json, Attributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    Gauge,
    Sum,
    Histogram,
    ExponentialHistogram,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Temporality {
    Delta,
    Cumulative,
    Unspecified,
}

/// Metric envelope: the name-level metadata shared by every data point of a
/// metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub metric_type: MetricType,
    /// Sum metrics only.
    pub temporality: Option<Temporality>,
    pub is_monotonic: Option<bool>,
}

/// One typed data point of a metric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub attributes: Attributes,
    pub start_time_ns: i64,
    pub time_ns: i64,
    pub value: PointValue,
    pub exemplars: Vec<Exemplar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointValue {
    Number(f64),
    Histogram {
        count: u64,
        sum: Option<f64>,
        bucket_counts: Vec<u64>,
        explicit_bounds: Vec<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Summary {
        count: u64,
        sum: f64,
        quantiles: Vec<(f64, f64)>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    pub time_ns: i64,
    pub value: f64,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl DataPoint {
    pub fn to_json(&self) -> serde_json::Value {
        let value = match &self.value {
            PointValue::Number(n) => serde_json::json!(n),
            PointValue::Histogram {
                count,
                sum,
                bucket_counts,
                explicit_bounds,
                min,
                max,
            } => serde_json::json!({
                "count": count,
                "sum": sum,
                "bucket_counts": bucket_counts,
                "explicit_bounds": explicit_bounds,
                "min": min,
                "max": max,
            }),
            PointValue::Summary { count, sum, quantiles } => serde_json::json!({
                "count": count,
                "sum": sum,
                "quantiles": quantiles,
            }),
        };
        serde_json::json!({
            "attributes": attrs_to_json(&self.attributes),
            "start_time_ns": self.start_time_ns,
            "time_ns": self.time_ns,
            "value": value,
        })
    }
}

/// Per-series attribute identity stored alongside the series index so the
/// read path can render series labels without re-deriving them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesIdentity {
    pub metric_name: String,
    pub resource_attributes: Attributes,
    pub point_attributes: Attributes,
}

/// Metric-series key: (metric_name, resource-attr hash, point-attr hash),
/// collapsed to 16 bytes of lowercase hex. Used for cardinality accounting
/// and as the series index key.
pub fn series_key(name: &str, resource_attrs: &Attributes, point_attrs: &Attributes) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0]);
    hasher.update(attr_hash(resource_attrs).as_bytes());
    hasher.update([0]);
    hasher.update(attr_hash(point_attrs).as_bytes());
    hex::encode(&hasher.finalize()[..16])
}
