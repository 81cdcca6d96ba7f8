//! Process-wide tunables read from environment variables, per spec.md §6's
//! "Environment variables" list. These sit alongside (not inside) the JSON
//! configuration document — they tune runtime defaults rather than describe
//! listeners.

/// Path to the JSON configuration document, when not given on the command line.
pub const MASTER_BUS_CONFIGURATION_PATH: &str = "MASTER_BUS_CONFIGURATION_PATH";
pub const EVENT_BUS_APPLICATION_NAME: &str = "EVENT_BUS_APPLICATION_NAME";
pub const EVENT_BUS_MASTER_STREAM: &str = "EVENT_BUS_MASTER_STREAM";
pub const EVENT_BUS_IDLE_TIME_MS: &str = "EVENT_BUS_IDLE_TIME_MS";
pub const EVENT_BUS_MAX_LENGTH: &str = "EVENT_BUS_MAX_LENGTH";
pub const HANDLER_KEY_LIFETIME_SECONDS: &str = "HANDLER_KEY_LIFETIME_SECONDS";
pub const MAX_HANDLER_ATTEMPTS: &str = "MAX_HANDLER_ATTEMPTS";
pub const EVENT_BUS_KEY_SEPARATOR: &str = "EVENT_BUS_KEY_SEPARATOR";
pub const DEBUG_EVENT_BUS: &str = "DEBUG_EVENT_BUS";
pub const EVENT_BUS_DATETIME_FORMAT: &str = "EVENT_BUS_DATETIME_FORMAT";
/// Shared bearer credential `close_streams` requests are checked against,
/// per spec.md §4.7. Read by both `fluxbus` (to gate the handler) and
/// `fluxbus-close` (to stamp outgoing requests), so a deployment only needs
/// to set this once for the pair to agree.
pub const EVENT_BUS_CLOSE_TOKEN: &str = "EVENT_BUS_CLOSE_TOKEN";

/// Runtime tunables resolved from environment variables, falling back to
/// the defaults spec.md §3/§4 name throughout.
#[derive(Debug, Clone)]
pub struct RuntimeDefaults {
    pub application_name: Option<String>,
    pub master_stream: String,
    pub idle_time_ms: u64,
    pub max_length: u64,
    pub key_lifetime_seconds: u64,
    pub max_handler_attempts: u32,
    pub key_separator: String,
    pub debug: bool,
    pub datetime_format: String,
    pub close_token: Option<String>,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        RuntimeDefaults {
            application_name: None,
            master_stream: "MASTER".to_string(),
            idle_time_ms: 600_000,
            max_length: 100,
            key_lifetime_seconds: 7_200,
            max_handler_attempts: 5,
            key_separator: ":".to_string(),
            debug: false,
            datetime_format: "%Y-%m-%d_%H%M".to_string(),
            close_token: None,
        }
    }
}

impl RuntimeDefaults {
    /// Resolve defaults from the process environment, falling back to
    /// [`RuntimeDefaults::default`] for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = RuntimeDefaults::default();
        RuntimeDefaults {
            application_name: std::env::var(EVENT_BUS_APPLICATION_NAME).ok(),
            master_stream: env_or(EVENT_BUS_MASTER_STREAM, defaults.master_stream),
            idle_time_ms: env_parsed_or(EVENT_BUS_IDLE_TIME_MS, defaults.idle_time_ms),
            max_length: env_parsed_or(EVENT_BUS_MAX_LENGTH, defaults.max_length),
            key_lifetime_seconds: env_parsed_or(HANDLER_KEY_LIFETIME_SECONDS, defaults.key_lifetime_seconds),
            max_handler_attempts: env_parsed_or(MAX_HANDLER_ATTEMPTS, defaults.max_handler_attempts),
            key_separator: env_or(EVENT_BUS_KEY_SEPARATOR, defaults.key_separator),
            debug: std::env::var(DEBUG_EVENT_BUS).is_ok(),
            datetime_format: env_or(EVENT_BUS_DATETIME_FORMAT, defaults.datetime_format),
            close_token: std::env::var(EVENT_BUS_CLOSE_TOKEN).ok(),
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_defaults_when_unset() {
        std::env::remove_var(EVENT_BUS_MASTER_STREAM);
        let defaults = RuntimeDefaults::from_env();
        assert_eq!(defaults.master_stream, "MASTER");
        assert_eq!(defaults.max_handler_attempts, 5);
    }

    #[test]
    fn reads_overrides_from_environment() {
        std::env::set_var(MAX_HANDLER_ATTEMPTS, "9");
        let defaults = RuntimeDefaults::from_env();
        assert_eq!(defaults.max_handler_attempts, 9);
        std::env::remove_var(MAX_HANDLER_ATTEMPTS);
    }
}
