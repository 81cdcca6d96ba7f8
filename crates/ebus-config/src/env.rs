//! `$VAR`-style environment variable dereferencing for configuration
//! string values, per spec.md §6: "Values beginning with `$` are
//! dereferenced from environment variables."

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration value references unset environment variable '{0}'")]
    MissingVariable(String),
}

/// Walk `value`, replacing every string that begins with `$` with the
/// contents of the named environment variable. Recurses into objects and
/// arrays; leaves non-string scalars untouched.
pub fn resolve_placeholders(value: &mut Value) -> Result<(), Error> {
    match value {
        Value::String(s) => {
            if let Some(var_name) = s.strip_prefix('$') {
                *s = std::env::var(var_name).map_err(|_| Error::MissingVariable(var_name.to_string()))?;
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_placeholders(item)?;
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                resolve_placeholders(v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dereferences_dollar_prefixed_strings() {
        std::env::set_var("FLUXBUS_TEST_VAR", "resolved");
        let mut value = serde_json::json!({"password": "$FLUXBUS_TEST_VAR", "host": "localhost"});
        resolve_placeholders(&mut value).unwrap();
        assert_eq!(value["password"], "resolved");
        assert_eq!(value["host"], "localhost");
        std::env::remove_var("FLUXBUS_TEST_VAR");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let mut value = serde_json::json!("$FLUXBUS_DEFINITELY_UNSET_VAR");
        assert!(matches!(resolve_placeholders(&mut value), Err(Error::MissingVariable(_))));
    }
}
