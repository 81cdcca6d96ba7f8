//! Coercion of raw stream-field bytes into typed JSON values, per spec.md §4.4.
//!
//! Redis Streams fields are always bytes on the wire; this module recovers
//! the likely intended scalar type before a payload is handed to variant
//! parsing. Grounded on the decode regexes in
//! `original_source/event_stream/utilities/constants.py`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref INTEGER_PATTERN: Regex =
        Regex::new(r"^-?\d+$").expect("INTEGER_PATTERN is a valid regex");
    static ref FLOATING_POINT_PATTERN: Regex =
        Regex::new(r"^-?\d+\.\d*$").expect("FLOATING_POINT_PATTERN is a valid regex");
}

/// Decode a raw string field into the most specific JSON scalar it matches.
///
/// Order of preference: `null`/`none`/`nil` (case-insensitive) to JSON null,
/// `true`/`false` (case-insensitive) to JSON bool, `nan`/`inf`/`-inf`
/// (case-insensitive) to JSON float, integer pattern to JSON integer,
/// floating point pattern to JSON float, otherwise the original string.
///
/// The original's broader `TRUE_VALUES` set (`"yes"`, `"on"`, `"1"`, etc.)
/// is deliberately not ported here; this decode only recognizes the strict
/// `true`/`false` spellings spec.md §4.4 names.
pub fn decode_field(raw: &str) -> serde_json::Value {
    let lower = raw.to_ascii_lowercase();

    match lower.as_str() {
        "null" | "none" | "nil" => return serde_json::Value::Null,
        "true" => return serde_json::Value::Bool(true),
        "false" => return serde_json::Value::Bool(false),
        "nan" => return json_f64(f64::NAN),
        "inf" | "infinity" => return json_f64(f64::INFINITY),
        "-inf" | "-infinity" => return json_f64(f64::NEG_INFINITY),
        _ => {}
    }

    if INTEGER_PATTERN.is_match(raw) {
        if let Ok(i) = raw.parse::<i64>() {
            return serde_json::Value::Number(i.into());
        }
    }

    if FLOATING_POINT_PATTERN.is_match(raw) {
        if let Ok(f) = raw.parse::<f64>() {
            return json_f64(f);
        }
    }

    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            return value;
        }
    }

    serde_json::Value::String(raw.to_string())
}

/// `NaN`/`Infinity` aren't representable as a `serde_json::Number`; fall back
/// to the string spelling so the value still round-trips through JSON.
fn json_f64(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(value.to_string()))
}

/// Apply [`decode_field`] to every string-valued leaf of a stream-field map,
/// leaving already-typed values (nested objects/arrays from a JSON payload)
/// untouched.
pub fn decode_fields(
    raw: impl IntoIterator<Item = (String, String)>,
) -> serde_json::Map<String, serde_json::Value> {
    raw.into_iter()
        .map(|(key, value)| (key, decode_field(&value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_integers() {
        assert_eq!(decode_field("42"), serde_json::json!(42));
        assert_eq!(decode_field("-7"), serde_json::json!(-7));
    }

    #[test]
    fn decodes_floats() {
        assert_eq!(decode_field("3.14"), serde_json::json!(3.14));
        assert_eq!(decode_field("-0.5"), serde_json::json!(-0.5));
    }

    #[test]
    fn decodes_booleans_case_insensitively() {
        assert_eq!(decode_field("TRUE"), serde_json::json!(true));
        assert_eq!(decode_field("False"), serde_json::json!(false));
    }

    #[test]
    fn decodes_null_spellings() {
        for spelling in ["null", "None", "NIL"] {
            assert_eq!(decode_field(spelling), serde_json::Value::Null);
        }
    }

    #[test]
    fn leaves_unmatched_strings_alone() {
        assert_eq!(decode_field("hoopla"), serde_json::json!("hoopla"));
        // Not a full integer match — has a trailing unit.
        assert_eq!(decode_field("42px"), serde_json::json!("42px"));
    }

    #[test]
    fn decodes_embedded_json_structures() {
        assert_eq!(decode_field(r#"{"a":1}"#), serde_json::json!({"a": 1}));
        assert_eq!(decode_field("[1,2,3]"), serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn broad_true_values_are_not_coerced() {
        // TRUE_VALUES in the original covers "yes"/"on"/"1" too; this port
        // intentionally only recognizes strict true/false.
        assert_eq!(decode_field("yes"), serde_json::json!("yes"));
        assert_eq!(decode_field("1"), serde_json::json!(1));
    }
}
