use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical OTLP attribute value: a tagged union over the seven OTLP
/// variants. Missing values decode to `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Array(Vec<AttributeValue>),
    /// `kvlist_value`: an ordered map.
    Map(Vec<(String, AttributeValue)>),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used by error predicates and filters: ints, doubles and
    /// numeric strings (`http.status_code` arrives as all three in the wild).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            AttributeValue::Double(d) => Some(*d as i64),
            AttributeValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Plain JSON rendering for API responses; attribute maps keep insertion
    /// order.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Null => serde_json::Value::Null,
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Int(i) => serde_json::json!(i),
            AttributeValue::Double(d) => serde_json::json!(d),
            AttributeValue::Array(vs) => {
                serde_json::Value::Array(vs.iter().map(|v| v.to_json()).collect())
            }
            AttributeValue::Map(kvs) => {
                let mut map = serde_json::Map::new();
                for (k, v) in kvs {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            AttributeValue::Bytes(b) => serde_json::Value::String(hex::encode(b)),
        }
    }
}

pub type Attributes = Vec<(String, AttributeValue)>;

/// Attributes of the entity that produced the telemetry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    pub attributes: Attributes,
    pub dropped_attributes_count: u32,
}

impl Resource {
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn service_name(&self) -> &str {
        self.get("service.name")
            .and_then(AttributeValue::as_str)
            .unwrap_or("unknown")
    }
}

/// Instrumentation-scope envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub version: String,
    pub attributes: Attributes,
}

/// Render an attribute list as a JSON object, keeping insertion order.
pub fn attrs_to_json(attrs: &Attributes) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (k, v) in attrs {
        map.insert(k.clone(), v.to_json());
    }
    serde_json::Value::Object(map)
}

/// Stable identity hash over an attribute set. Keys are sorted before hashing
/// so the identity is insertion-order independent; truncated to 16 bytes of
/// lowercase hex.
pub fn attr_hash(attrs: &Attributes) -> String {
    let mut sorted: Vec<&(String, AttributeValue)> = attrs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (k, v) in sorted {
        hasher.update(k.as_bytes());
        hasher.update([0]);
        hasher.update(serde_json::to_string(&v.to_json()).unwrap_or_default().as_bytes());
        hasher.update([0]);
    }
    hex::encode(&hasher.finalize()[..16])
}
