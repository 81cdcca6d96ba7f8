//! The configuration-document shape of a code designation, per spec.md §3:
//! `{module, name, kwargs, message_variant?}`. This is the unresolved,
//! serializable counterpart to `fluxbus_runtime::CodeDesignation`, which
//! additionally carries a resolved handler reference obtained by looking
//! this value up in a `fluxbus_runtime::HandlerRegistry` at listener start.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CodeDesignationConfig {
    /// # The module a handler is registered under.
    pub module: String,
    /// # The handler's registered name within its module.
    pub name: String,
    /// # Extra keyword arguments passed to every invocation of this handler.
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    /// # Require the incoming message already resolve to this variant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_variant: Option<String>,
}
