//! Body normalization ahead of diffing.
//!
//! Port lists come back from the scanner in arbitrary order, so they are
//! projected into the port-dictionary form (a map keyed by port number)
//! before diffing. Comparing raw ordered lists would flag reorderings as
//! drift and compare unrelated ports positionally.

use serde_json::Value;

use crate::DiffError;

const REQUIRED_FIELDS: [&str; 3] = ["host", "status", "ports"];

/// Validate that a body carries the required snapshot fields.
///
/// Called before diffing; a failing body is surfaced as a schema error
/// and never diffed.
pub fn validate_body(body: &Value) -> Result<(), DiffError> {
    let Some(obj) = body.as_object() else {
        return Err(DiffError::NotAnObject);
    };
    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            return Err(DiffError::Schema(field.to_string()));
        }
    }
    Ok(())
}

/// Project a body's `ports` array into a map keyed by port number.
///
/// Entries without a `portid` fall back to their list index as the key.
/// Bodies whose `ports` value is already a map (or missing) pass through
/// unchanged.
pub fn port_dictionary(body: &Value) -> Value {
    let mut out = body.clone();
    let Some(ports) = out.get("ports").and_then(|p| p.as_array()).cloned() else {
        return out;
    };

    let mut dict = serde_json::Map::new();
    for (index, port) in ports.into_iter().enumerate() {
        let key = port
            .get("portid")
            .and_then(|p| p.as_u64())
            .map(|p| p.to_string())
            .unwrap_or_else(|| index.to_string());
        dict.insert(key, port);
    }
    out["ports"] = Value::Object(dict);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_required_fields() {
        assert!(validate_body(&json!({"host": "h", "status": "up", "ports": []})).is_ok());

        let err = validate_body(&json!({"host": "h", "status": "up"})).unwrap_err();
        assert!(matches!(err, DiffError::Schema(f) if f == "ports"));

        let err = validate_body(&json!("not an object")).unwrap_err();
        assert!(matches!(err, DiffError::NotAnObject));
    }

    #[test]
    fn ports_keyed_by_port_number() {
        let body = json!({
            "host": "h",
            "status": "up",
            "ports": [
                {"portid": 443, "state": "open"},
                {"portid": 22, "state": "open"},
            ],
        });
        let normalized = port_dictionary(&body);
        assert_eq!(normalized["ports"]["22"]["state"], "open");
        assert_eq!(normalized["ports"]["443"]["portid"], 443);
    }

    #[test]
    fn normalization_is_order_independent() {
        let a = json!({"host": "h", "status": "up", "ports": [
            {"portid": 22, "state": "open"},
            {"portid": 80, "state": "closed"},
        ]});
        let b = json!({"host": "h", "status": "up", "ports": [
            {"portid": 80, "state": "closed"},
            {"portid": 22, "state": "open"},
        ]});
        assert_eq!(port_dictionary(&a), port_dictionary(&b));
    }

    #[test]
    fn entries_without_portid_use_index_keys() {
        let body = json!({"host": "h", "status": "up", "ports": [{"state": "open"}]});
        let normalized = port_dictionary(&body);
        assert_eq!(normalized["ports"]["0"]["state"], "open");
    }

    #[test]
    fn non_array_ports_pass_through() {
        let body = json!({"host": "h", "status": "up", "ports": {"22": {"state": "open"}}});
        assert_eq!(port_dictionary(&body), body);
    }
}
