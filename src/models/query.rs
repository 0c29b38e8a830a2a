use serde::Deserialize;
use serde_json::Value;

/// A structured query filter: field, operator, value.
#[derive(Debug, Clone, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// Resolve a filter field against a record's JSON rendering.
///
/// Top-level fields resolve directly; short aliases cover the fields the
/// endpoint table names (`service`, `status`, `severity`); anything else is
/// looked up in `attributes`, then in `resource.attributes`.
pub fn resolve_field<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    let field = match field {
        "service" => "service_name",
        "status" => "status_code",
        "severity" => "severity_number",
        "operation" => "name",
        other => other,
    };
    if let Some(v) = record.get(field) {
        return Some(v);
    }
    if let Some(v) = record.get("attributes").and_then(|a| a.get(field)) {
        return Some(v);
    }
    record
        .get("resource")
        .and_then(|r| r.get("attributes"))
        .and_then(|a| a.get(field))
}

/// Evaluate one filter against a record's JSON rendering. A missing field
/// matches nothing except `ne`.
pub fn matches_filter(record: &Value, filter: &Filter) -> bool {
    let Some(actual) = resolve_field(record, &filter.field) else {
        return matches!(filter.op, FilterOp::Ne);
    };
    match filter.op {
        FilterOp::Eq => values_equal(actual, &filter.value),
        FilterOp::Ne => !values_equal(actual, &filter.value),
        FilterOp::In => filter
            .value
            .as_array()
            .map(|arr| arr.iter().any(|v| values_equal(actual, v)))
            .unwrap_or(false),
        FilterOp::Gt => compare(actual, &filter.value).map(|o| o.is_gt()).unwrap_or(false),
        FilterOp::Gte => compare(actual, &filter.value).map(|o| o.is_ge()).unwrap_or(false),
        FilterOp::Lt => compare(actual, &filter.value).map(|o| o.is_lt()).unwrap_or(false),
        FilterOp::Lte => compare(actual, &filter.value).map(|o| o.is_le()).unwrap_or(false),
        FilterOp::Contains => match (actual.as_str(), filter.value.as_str()) {
            (Some(a), Some(b)) => a.contains(b),
            _ => false,
        },
    }
}

pub fn matches_all(record: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches_filter(record, f))
}

/// Loose equality: numbers compare numerically, and numeric strings compare
/// equal to numbers (attribute values arrive as both).
fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// Parse the `filters` query parameter (a JSON-encoded array of filter
/// objects). An absent parameter means no filters.
pub fn parse_filters(raw: Option<&str>) -> Result<Vec<Filter>, String> {
    match raw {
        None | Some("") => Ok(Vec::new()),
        Some(s) => serde_json::from_str(s).map_err(|e| format!("invalid filters: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "service_name": "checkout",
            "status_code": 2,
            "name": "GET /cart",
            "attributes": {"http.status_code": "503", "http.route": "/cart"},
            "resource": {"attributes": {"host.name": "box1"}},
        })
    }

    #[test]
    fn eq_and_aliases() {
        let r = record();
        let f = Filter { field: "service".into(), op: FilterOp::Eq, value: json!("checkout") };
        assert!(matches_filter(&r, &f));
        let f = Filter { field: "status".into(), op: FilterOp::Eq, value: json!(2) };
        assert!(matches_filter(&r, &f));
    }

    #[test]
    fn numeric_string_attribute_compares_numerically() {
        let r = record();
        let f = Filter { field: "http.status_code".into(), op: FilterOp::Gte, value: json!(500) };
        assert!(matches_filter(&r, &f));
        let f = Filter { field: "http.status_code".into(), op: FilterOp::Eq, value: json!(503) };
        assert!(matches_filter(&r, &f));
    }

    #[test]
    fn in_contains_and_resource_lookup() {
        let r = record();
        let f = Filter {
            field: "service_name".into(),
            op: FilterOp::In,
            value: json!(["billing", "checkout"]),
        };
        assert!(matches_filter(&r, &f));
        let f = Filter { field: "http.route".into(), op: FilterOp::Contains, value: json!("car") };
        assert!(matches_filter(&r, &f));
        let f = Filter { field: "host.name".into(), op: FilterOp::Eq, value: json!("box1") };
        assert!(matches_filter(&r, &f));
    }

    #[test]
    fn missing_field_only_matches_ne() {
        let r = record();
        let f = Filter { field: "nope".into(), op: FilterOp::Eq, value: json!(1) };
        assert!(!matches_filter(&r, &f));
        let f = Filter { field: "nope".into(), op: FilterOp::Ne, value: json!(1) };
        assert!(matches_filter(&r, &f));
    }

    #[test]
    fn filters_param_parses() {
        let fs = parse_filters(Some(r#"[{"field":"service","op":"eq","value":"a"}]"#)).unwrap();
        assert_eq!(fs.len(), 1);
        assert!(parse_filters(Some("not json")).is_err());
        assert!(parse_filters(None).unwrap().is_empty());
    }
}
