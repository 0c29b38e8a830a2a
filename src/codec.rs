//! OTLP attribute and identifier codec.
//!
//! OTLP/JSON payloads arrive with either snake_case (`string_value`) or
//! camelCase (`stringValue`) field names depending on the exporter. This module
//! is the only place that dual spelling is handled; everything downstream works
//! on canonical records.

use base64::Engine;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::models::attr::AttributeValue;

/// Look up a field under either of its two OTLP/JSON spellings.
pub fn field<'a>(obj: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    let map = obj.as_object()?;
    map.get(snake).or_else(|| map.get(camel))
}

/// Decode an OTLP `AnyValue` into the canonical tagged union.
/// Missing or unrecognized variants decode to `Null`.
pub fn decode_value(v: &Value) -> AttributeValue {
    if !v.is_object() {
        return AttributeValue::Null;
    }

    if let Some(s) = field(v, "string_value", "stringValue").and_then(Value::as_str) {
        return AttributeValue::String(s.to_string());
    }
    if let Some(b) = field(v, "bool_value", "boolValue").and_then(Value::as_bool) {
        return AttributeValue::Bool(b);
    }
    if let Some(iv) = field(v, "int_value", "intValue") {
        // intValue is a decimal string in canonical OTLP/JSON, but some
        // exporters send a bare number
        if let Some(i) = iv.as_i64() {
            return AttributeValue::Int(i);
        }
        if let Some(i) = iv.as_str().and_then(|s| s.parse::<i64>().ok()) {
            return AttributeValue::Int(i);
        }
    }
    if let Some(d) = field(v, "double_value", "doubleValue").and_then(Value::as_f64) {
        return AttributeValue::Double(d);
    }
    if let Some(arr) = field(v, "array_value", "arrayValue") {
        let values = field(arr, "values", "values")
            .and_then(Value::as_array)
            .map(|vs| vs.iter().map(decode_value).collect())
            .unwrap_or_default();
        return AttributeValue::Array(values);
    }
    if let Some(kvl) = field(v, "kvlist_value", "kvlistValue") {
        let pairs = field(kvl, "values", "values")
            .and_then(Value::as_array)
            .map(|vs| {
                vs.iter()
                    .filter_map(|kv| {
                        let key = kv.get("key")?.as_str()?.to_string();
                        let val = kv.get("value").map(decode_value).unwrap_or(AttributeValue::Null);
                        Some((key, val))
                    })
                    .collect()
            })
            .unwrap_or_default();
        return AttributeValue::Map(pairs);
    }
    if let Some(b) = field(v, "bytes_value", "bytesValue").and_then(Value::as_str) {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(b) {
            return AttributeValue::Bytes(bytes);
        }
    }

    AttributeValue::Null
}

/// Decode an OTLP attribute list (`[{key, value}, ...]`) preserving the
/// producer's ordering.
pub fn decode_attributes(v: Option<&Value>) -> Vec<(String, AttributeValue)> {
    let Some(arr) = v.and_then(Value::as_array) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|kv| {
            let key = kv.get("key")?.as_str()?.to_string();
            let val = kv.get("value").map(decode_value).unwrap_or(AttributeValue::Null);
            Some((key, val))
        })
        .collect()
}

/// Encode raw identifier bytes as lowercase hex.
pub fn encode_id(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a trace identifier (16 bytes) from binary, base64 or hex input.
pub fn decode_trace_id(v: &Value) -> CoreResult<String> {
    decode_id(v, 16)
}

/// Decode a span identifier (8 bytes) from binary, base64 or hex input.
pub fn decode_span_id(v: &Value) -> CoreResult<String> {
    decode_id(v, 8)
}

/// Decode an identifier into lowercase hex. Accepts a JSON byte array (raw
/// binary), a hex string of any case, or a base64 string; fails with
/// `MalformedId` only when the decoded byte length is not `expected_len`.
pub fn decode_id(v: &Value, expected_len: usize) -> CoreResult<String> {
    match v {
        Value::Array(nums) => {
            let bytes: Vec<u8> = nums
                .iter()
                .filter_map(|n| n.as_u64().map(|b| b as u8))
                .collect();
            if bytes.len() != expected_len {
                return Err(CoreError::MalformedId(format!("{} bytes", bytes.len())));
            }
            Ok(encode_id(&bytes))
        }
        Value::String(s) => decode_id_str(s, expected_len),
        other => Err(CoreError::MalformedId(other.to_string())),
    }
}

/// String form of [`decode_id`]: hex first (any case), then base64.
pub fn decode_id_str(s: &str, expected_len: usize) -> CoreResult<String> {
    if s.len() == expected_len * 2 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(s.to_ascii_lowercase());
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|_| CoreError::MalformedId(s.to_string()))?;
    if decoded.len() != expected_len {
        return Err(CoreError::MalformedId(s.to_string()));
    }
    Ok(encode_id(&decoded))
}

/// Parse a nanosecond timestamp that may arrive as a decimal string or a bare
/// number (OTLP/JSON encodes uint64 as string).
pub fn parse_ns(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
        _ => 0,
    }
}

/// Parse a small integer field (enum discriminants, counts) under dual spelling.
pub fn parse_u32(obj: &Value, snake: &str, camel: &str) -> u32 {
    field(obj, snake, camel)
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0) as u32
}

/// Parse a string field under dual spelling.
pub fn parse_str(obj: &Value, snake: &str, camel: &str) -> String {
    field(obj, snake, camel)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_both_spellings() {
        let snake = json!({"string_value": "checkout"});
        let camel = json!({"stringValue": "checkout"});
        assert_eq!(decode_value(&snake), decode_value(&camel));
        assert_eq!(
            decode_value(&snake),
            AttributeValue::String("checkout".into())
        );
    }

    #[test]
    fn int_value_as_decimal_string() {
        let v = json!({"intValue": "42"});
        assert_eq!(decode_value(&v), AttributeValue::Int(42));
        let v = json!({"int_value": 42});
        assert_eq!(decode_value(&v), AttributeValue::Int(42));
    }

    #[test]
    fn array_and_kvlist() {
        let v = json!({"arrayValue": {"values": [{"intValue": "1"}, {"stringValue": "x"}]}});
        assert_eq!(
            decode_value(&v),
            AttributeValue::Array(vec![
                AttributeValue::Int(1),
                AttributeValue::String("x".into())
            ])
        );
        let v = json!({"kvlist_value": {"values": [{"key": "a", "value": {"boolValue": true}}]}});
        assert_eq!(
            decode_value(&v),
            AttributeValue::Map(vec![("a".into(), AttributeValue::Bool(true))])
        );
    }

    #[test]
    fn missing_variant_is_null() {
        assert_eq!(decode_value(&json!({})), AttributeValue::Null);
        assert_eq!(decode_value(&json!(null)), AttributeValue::Null);
    }

    #[test]
    fn attribute_order_is_preserved() {
        let v = json!([
            {"key": "z", "value": {"intValue": "1"}},
            {"key": "a", "value": {"intValue": "2"}}
        ]);
        let attrs = decode_attributes(Some(&v));
        assert_eq!(attrs[0].0, "z");
        assert_eq!(attrs[1].0, "a");
    }

    #[test]
    fn id_roundtrip_hex_and_base64() {
        let bytes: [u8; 8] = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x11, 0x22, 0x33];
        let hexed = encode_id(&bytes);
        assert_eq!(hexed, "deadbeef00112233");
        assert_eq!(hexed.len(), 16);

        // hex, any case
        assert_eq!(decode_id_str("DEADBEEF00112233", 8).unwrap(), hexed);
        // base64
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        assert_eq!(decode_id_str(&b64, 8).unwrap(), hexed);
        // binary (JSON byte array)
        let arr = json!([222, 173, 190, 239, 0, 17, 34, 51]);
        assert_eq!(decode_id(&arr, 8).unwrap(), hexed);
    }

    #[test]
    fn id_wrong_length_is_malformed() {
        assert!(matches!(
            decode_id_str("abcd", 8),
            Err(CoreError::MalformedId(_))
        ));
        // 12 bytes of base64 against a 16-byte trace id
        let b64 = base64::engine::general_purpose::STANDARD.encode([1u8; 12]);
        assert!(decode_id_str(&b64, 16).is_err());
    }

    #[test]
    fn timestamps_as_string_or_number() {
        assert_eq!(parse_ns(Some(&json!("1700000000000000000"))), 1_700_000_000_000_000_000);
        assert_eq!(parse_ns(Some(&json!(12345))), 12345);
        assert_eq!(parse_ns(None), 0);
    }
}
