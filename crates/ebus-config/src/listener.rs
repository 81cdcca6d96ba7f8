//! Listener configuration, per spec.md §3's "two polymorphic variants": Bus
//! Listener (many events) and Handler Group (exactly one event).

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::credentials::StoreCredentials;
use crate::designation::CodeDesignationConfig;

/// Fields shared by both listener variants, per spec.md §3: "Both share:
/// `name`, `stream`, `unique` flag, optional store credentials".
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ListenerCommon {
    /// # This listener's configured name, used to derive its group/consumer names.
    pub name: String,
    /// # The stream this listener reads from. Falls back to the document default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// # When true, every running instance of the application receives every message independently.
    #[serde(default)]
    pub unique: bool,
    /// # Overrides the document-wide default store credentials for this listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<StoreCredentials>,
    /// # Enable verbose per-message logging for this listener.
    #[serde(default)]
    pub verbose: bool,
}

/// Dispatches many event types to their configured handlers, per spec.md
/// §3/§4.4.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BusListenerConfig {
    #[serde(flatten)]
    pub common: ListenerCommon,
    /// # Event name to ordered handler list.
    pub handlers: HashMap<String, Vec<CodeDesignationConfig>>,
}

/// Dispatches exactly one event to exactly one handler, per spec.md §3/§4.4.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HandlerGroupConfig {
    #[serde(flatten)]
    pub common: ListenerCommon,
    /// # The single event this handler group answers to.
    pub event: String,
    /// # The handler invoked for `event`.
    pub designation: CodeDesignationConfig,
    /// # Require the incoming message already resolve to this variant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_variant: Option<String>,
}
