//! Serialization of a parsed message back to Redis Streams wire fields, per
//! spec.md §4.5 "Serialization to stream".
//!
//! Every value on the wire is a byte string; scalars are stringified
//! directly and structured sub-records/lists are JSON-encoded. `None`-valued
//! fields are omitted entirely rather than written as an empty string.

use serde_json::Value;

/// Flatten a parsed message's JSON object form into `(field, value)` pairs
/// ready for `XADD`. Panics if `value` is not a JSON object — every
/// registered [`crate::variant::MessageVariant`] serializes to one via its
/// embedded [`crate::envelope::Envelope`].
pub fn to_wire_fields(value: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = value else {
        panic!("message values always serialize to a JSON object");
    };

    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(key, v)| (key.clone(), scalarize(v)))
        .collect()
}

fn scalarize(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        // Structured sub-records and lists (including `header`) are
        // JSON-encoded, per spec.md §4.5.
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(value).expect("JSON values always re-encode")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_pass_through_unencoded() {
        let fields = to_wire_fields(&serde_json::json!({"event": "generic", "count": 3, "ok": true}));
        assert!(fields.contains(&("event".to_string(), "generic".to_string())));
        assert!(fields.contains(&("count".to_string(), "3".to_string())));
        assert!(fields.contains(&("ok".to_string(), "true".to_string())));
    }

    #[test]
    fn null_fields_are_omitted() {
        let fields = to_wire_fields(&serde_json::json!({"event": "generic", "message_id": null}));
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn structured_values_are_json_encoded() {
        let fields = to_wire_fields(&serde_json::json!({"event": "generic", "data": {"a": 1}}));
        let (_, data) = fields.iter().find(|(k, _)| k == "data").unwrap();
        assert_eq!(data, "{\"a\":1}");
    }
}
