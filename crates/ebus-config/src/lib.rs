//! The configuration document schema, per spec.md §6: "a top-level
//! application name, default stream name, default store credentials, list
//! of Bus Listeners, list of Handler Groups, optional TLS material" plus
//! `$VAR` environment dereferencing and JSON Schema generation.

pub mod credentials;
pub mod designation;
pub mod env;
pub mod env_defaults;
pub mod listener;

pub use credentials::{CredentialsError, PasswordSource, StoreCredentials, TlsConfig};
pub use designation::CodeDesignationConfig;
pub use env_defaults::RuntimeDefaults;
pub use listener::{BusListenerConfig, HandlerGroupConfig, ListenerCommon};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The full configuration document, per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Configuration {
    /// # This application's name, used to derive group/consumer names.
    pub application_name: String,
    /// # Stream used by listeners that don't declare their own.
    pub default_stream: String,
    /// # Default store connection credentials.
    pub default_credentials: StoreCredentials,
    /// # Bus Listeners: dispatch many event types from declared handler maps.
    #[serde(default)]
    pub bus_listeners: Vec<BusListenerConfig>,
    /// # Handler Groups: dispatch exactly one event to exactly one handler.
    #[serde(default)]
    pub handler_groups: Vec<HandlerGroupConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {0:?}: {1}")]
    Io(std::path::PathBuf, #[source] std::io::Error),
    #[error("configuration is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error(transparent)]
    EnvPlaceholder(#[from] env::Error),
    #[error("more than one listener is configured with the name '{0}'")]
    DuplicateListenerName(String),
    #[error("listener '{0}' has no stream and the document has no default_stream")]
    NoStreamConfigured(String),
    #[error("handler group '{0}' declares an empty event name")]
    EmptyEventName(String),
}

impl Configuration {
    /// Parse a configuration document from `text`, dereferencing `$VAR`
    /// environment placeholders first.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut value: serde_json::Value = serde_json::from_str(text).map_err(ConfigError::InvalidJson)?;
        env::resolve_placeholders(&mut value)?;
        serde_json::from_value(value).map_err(ConfigError::InvalidJson)
    }

    pub fn parse_path(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&text)
    }

    /// Validate structural invariants beyond what `serde` enforces,
    /// aggregating every error found rather than stopping at the first —
    /// spec.md §7's "Configuration errors ... aggregated and reported
    /// before any listener starts."
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut seen_names = std::collections::HashSet::new();

        for listener in &self.bus_listeners {
            if listener.common.stream.is_none() && self.default_stream.is_empty() {
                errors.push(ConfigError::NoStreamConfigured(listener.common.name.clone()));
            }
            if !seen_names.insert(listener.common.name.clone()) {
                errors.push(ConfigError::DuplicateListenerName(listener.common.name.clone()));
            }
        }

        for group in &self.handler_groups {
            if group.event.is_empty() {
                errors.push(ConfigError::EmptyEventName(group.common.name.clone()));
            }
            if group.common.stream.is_none() && self.default_stream.is_empty() {
                errors.push(ConfigError::NoStreamConfigured(group.common.name.clone()));
            }
            if !seen_names.insert(group.common.name.clone()) {
                errors.push(ConfigError::DuplicateListenerName(group.common.name.clone()));
            }
        }

        errors
    }

    /// The stream a listener should read, falling back to the document
    /// default.
    pub fn resolve_stream<'a>(&'a self, listener_stream: &'a Option<String>) -> &'a str {
        listener_stream.as_deref().unwrap_or(&self.default_stream)
    }

    /// The store credentials a listener should use, falling back to the
    /// document default.
    pub fn resolve_credentials<'a>(&'a self, listener_credentials: &'a Option<StoreCredentials>) -> &'a StoreCredentials {
        listener_credentials.as_ref().unwrap_or(&self.default_credentials)
    }
}

/// The JSON Schema of [`Configuration`], for the `generate-schema` CLI tool
/// and the `schema` command spec.md §6 names.
pub fn schema() -> schemars::Schema {
    schemars::schema_for!(Configuration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_document() -> serde_json::Value {
        serde_json::json!({
            "applicationName": "svc",
            "defaultStream": "EVENTS",
            "defaultCredentials": {"host": "localhost"},
        })
    }

    #[test]
    fn parses_minimal_document() {
        let config = Configuration::parse(&minimal_document().to_string()).unwrap();
        assert_eq!(config.application_name, "svc");
        assert_eq!(config.default_stream, "EVENTS");
        assert!(config.bus_listeners.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut doc = minimal_document();
        doc["unexpectedField"] = serde_json::json!(true);
        assert!(Configuration::parse(&doc.to_string()).is_err());
    }

    #[test]
    fn validate_flags_listener_with_no_stream_and_no_default() {
        let mut doc = minimal_document();
        doc["defaultStream"] = serde_json::json!("");
        doc["busListeners"] = serde_json::json!([
            {"name": "bus", "unique": false, "handlers": {}}
        ]);
        let config: Configuration = serde_json::from_value(doc).unwrap();
        let errors = config.validate();
        assert!(matches!(errors.as_slice(), [ConfigError::NoStreamConfigured(name)] if name == "bus"));
    }

    #[test]
    fn dollar_prefixed_password_is_resolved_from_environment() {
        std::env::set_var("FLUXBUS_CONFIG_TEST_PASSWORD", "hunter2");
        let mut doc = minimal_document();
        doc["defaultCredentials"]["password"] = serde_json::json!({"inline": "$FLUXBUS_CONFIG_TEST_PASSWORD"});
        let config = Configuration::parse(&doc.to_string()).unwrap();
        match config.default_credentials.password {
            Some(PasswordSource::Inline(value)) => assert_eq!(value, "hunter2"),
            other => panic!("expected a resolved inline password, got {other:?}"),
        }
        std::env::remove_var("FLUXBUS_CONFIG_TEST_PASSWORD");
    }

    #[test]
    fn schema_describes_top_level_fields() {
        let schema = schema();
        let value = serde_json::to_value(&schema).unwrap();
        let properties = value["properties"].as_object().unwrap();
        assert!(properties.contains_key("applicationName"));
        assert!(properties.contains_key("busListeners"));
    }
}
