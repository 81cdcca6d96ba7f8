//! Store connection credentials and optional TLS material, per spec.md §6's
//! Configuration contract.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where a password value actually lives. Configuration values beginning
/// with `$` are dereferenced from the environment before parsing reaches
/// this type (see [`crate::env::resolve_placeholders`]); `PasswordSource`
/// additionally lets an operator name an indirection explicitly instead of
/// inlining a secret in the document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum PasswordSource {
    /// The password value is given directly.
    Inline(String),
    /// Read the password from the named environment variable at startup.
    Environment(String),
    /// Read the password from the contents of the named file at startup.
    File(String),
}

/// Optional TLS material for the store connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TlsConfig {
    /// # Path to a CA certificate file used to verify the store's certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    /// # Path to a client private key file for mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    /// # Directory of trusted CA certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<String>,
    /// # Inline PEM-encoded CA certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certs: Option<String>,
}

/// Store connection parameters for one listener (or the document-wide
/// default).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct StoreCredentials {
    /// # Store host name or address.
    pub host: String,
    /// # Store port.
    #[serde(default = "StoreCredentials::default_port")]
    pub port: u16,
    /// # Where to read the connection password from, if one is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordSource>,
    /// # Optional TLS material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("password references unset environment variable '{0}'")]
    MissingVariable(String),
    #[error("failed to read password file {0:?}: {1}")]
    FileRead(String, #[source] std::io::Error),
}

impl StoreCredentials {
    pub fn default_port() -> u16 {
        6379
    }

    /// Resolve `password` to an actual secret value, reading the named
    /// environment variable or file at call time — distinct from `$VAR`
    /// document-wide placeholder dereferencing (`crate::env`), which
    /// resolves at parse time; this indirection is evaluated lazily, each
    /// time a connection is opened, so a rotated file-backed secret is
    /// picked up without reparsing the configuration document.
    pub fn resolve_password(&self) -> Result<Option<String>, CredentialsError> {
        match &self.password {
            None => Ok(None),
            Some(PasswordSource::Inline(value)) => Ok(Some(value.clone())),
            Some(PasswordSource::Environment(var)) => std::env::var(var)
                .map(Some)
                .map_err(|_| CredentialsError::MissingVariable(var.clone())),
            Some(PasswordSource::File(path)) => std::fs::read_to_string(path)
                .map(|contents| Some(contents.trim().to_string()))
                .map_err(|err| CredentialsError::FileRead(path.clone(), err)),
        }
    }

    /// A `redis://`/`rediss://` connection URL for these credentials, for
    /// `fluxbus_store::RedisStreamStore::connect`. Uses `rediss://` whenever
    /// TLS material is configured, on the assumption that the deployment
    /// environment's Redis build already negotiates TLS appropriately; the
    /// individual `ca_file`/`key_file`/`ca_path`/`ca_certs` fields are
    /// parsed and validated but not independently wired into the
    /// connection (see DESIGN.md).
    pub fn redis_url(&self) -> Result<String, CredentialsError> {
        let password = self.resolve_password()?;
        let scheme = if self.tls.is_some() { "rediss" } else { "redis" };
        let auth = password
            .map(|password| format!(":{password}@"))
            .unwrap_or_default();
        Ok(format!("{scheme}://{auth}{}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_without_password_or_tls() {
        let creds = StoreCredentials {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            tls: None,
        };
        assert_eq!(creds.redis_url().unwrap(), "redis://localhost:6379");
    }

    #[test]
    fn redis_url_with_inline_password_and_tls_uses_rediss_scheme() {
        let creds = StoreCredentials {
            host: "store.internal".to_string(),
            port: 6380,
            password: Some(PasswordSource::Inline("hunter2".to_string())),
            tls: Some(TlsConfig::default()),
        };
        assert_eq!(creds.redis_url().unwrap(), "rediss://:hunter2@store.internal:6380");
    }

    #[test]
    fn environment_password_source_reads_named_variable() {
        std::env::set_var("FLUXBUS_CREDENTIALS_TEST_VAR", "from-env");
        let creds = StoreCredentials {
            host: "localhost".to_string(),
            port: 6379,
            password: Some(PasswordSource::Environment("FLUXBUS_CREDENTIALS_TEST_VAR".to_string())),
            tls: None,
        };
        assert_eq!(creds.resolve_password().unwrap(), Some("from-env".to_string()));
        std::env::remove_var("FLUXBUS_CREDENTIALS_TEST_VAR");
    }
}
