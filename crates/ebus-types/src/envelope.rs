use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single frame of a captured stack trace, attached to [`Header`] when a
/// message is sent with `include_stack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// The default number of [`StackFrame`]s retained in a [`Header::trace`].
pub const DEFAULT_STACK_DEPTH: usize = 10;

/// Caller metadata attached to an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<StackFrame>,
}

impl Header {
    /// Build a header stamped with the current time, optionally capturing
    /// the call-site backtrace (capped at [`DEFAULT_STACK_DEPTH`] frames).
    pub fn create(application: Option<String>, host: Option<String>, user: Option<String>) -> Self {
        Header {
            application,
            host,
            user,
            timestamp: Some(chrono::Utc::now()),
            trace: Vec::new(),
        }
    }

    pub fn with_trace(mut self, frames: impl IntoIterator<Item = StackFrame>) -> Self {
        self.trace = frames.into_iter().take(DEFAULT_STACK_DEPTH).collect();
        self
    }
}

/// The base event-bus message envelope. Every concrete [`crate::variant::MessageVariant`]
/// embeds one of these as its head, carrying the fields common to all messages.
///
/// Unknown keys present on the wire are captured verbatim in `extra` and
/// round-trip on re-serialization (spec invariant: `keys()` after a
/// parse/serialize cycle equals the union of declared and extra field names).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("a message's `event` field must not be empty")]
    EmptyEvent,
    #[error("a response message's `event` must end in `_response`, got `{0}`")]
    ResponseEventSuffix(String),
}

impl Envelope {
    pub fn new(event: impl Into<String>) -> Self {
        Envelope {
            event: event.into(),
            message_id: None,
            header: None,
            application_name: None,
            application_instance: None,
            response_to: None,
            workflow_id: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Validate the invariants spec.md §3 places on every envelope.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.event.is_empty() {
            return Err(EnvelopeError::EmptyEvent);
        }
        if self.response_to.is_some() && !self.event.ends_with("_response") {
            return Err(EnvelopeError::ResponseEventSuffix(self.event.clone()));
        }
        Ok(())
    }

    /// Declared-field names, in the fixed order used for indexed/dict access.
    pub const DECLARED_FIELDS: [&'static str; 7] = [
        "event",
        "message_id",
        "header",
        "application_name",
        "application_instance",
        "response_to",
        "workflow_id",
    ];

    /// Look up a key first among declared fields, then among extras.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "event" => Some(serde_json::Value::String(self.event.clone())),
            "message_id" => self.message_id.clone().map(serde_json::Value::String),
            "header" => self
                .header
                .as_ref()
                .map(|h| serde_json::to_value(h).expect("Header always serializes")),
            "application_name" => self.application_name.clone().map(serde_json::Value::String),
            "application_instance" => self
                .application_instance
                .clone()
                .map(serde_json::Value::String),
            "response_to" => self.response_to.clone().map(serde_json::Value::String),
            "workflow_id" => self.workflow_id.clone().map(serde_json::Value::String),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Iterate `(key, value)` pairs in declared-first-then-extra order.
    pub fn items(&self) -> Vec<(String, serde_json::Value)> {
        let mut out: Vec<(String, serde_json::Value)> = Self::DECLARED_FIELDS
            .iter()
            .filter_map(|k| self.get(k).map(|v| (k.to_string(), v)))
            .collect();
        out.extend(
            self.extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        out
    }

    pub fn keys(&self) -> Vec<String> {
        self.items().into_iter().map(|(k, _)| k).collect()
    }

    pub fn values(&self) -> Vec<serde_json::Value> {
        self.items().into_iter().map(|(_, v)| v).collect()
    }

    /// Integer indexing into the declared-then-extra union, per spec.md §4.5.
    pub fn nth(&self, index: usize) -> Option<(String, serde_json::Value)> {
        self.items().into_iter().nth(index)
    }

    /// Set a field, routing to the declared slot when the name matches one,
    /// otherwise into `extra`.
    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        match key {
            "event" => {
                if let serde_json::Value::String(s) = value {
                    self.event = s;
                }
            }
            "message_id" => self.message_id = value.as_str().map(str::to_string),
            "header" => self.header = serde_json::from_value(value).ok(),
            "application_name" => self.application_name = value.as_str().map(str::to_string),
            "application_instance" => {
                self.application_instance = value.as_str().map(str::to_string)
            }
            "response_to" => self.response_to = value.as_str().map(str::to_string),
            "workflow_id" => self.workflow_id = value.as_str().map(str::to_string),
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }
}

impl crate::variant::MessageVariant for Envelope {
    const DEPTH: u32 = 1;

    fn required_fields() -> &'static [&'static str] {
        &[]
    }

    fn envelope(&self) -> &Envelope {
        self
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_event_is_invalid() {
        let envelope = Envelope::new("");
        assert!(matches!(envelope.validate(), Err(EnvelopeError::EmptyEvent)));
    }

    #[test]
    fn response_event_must_carry_suffix() {
        let mut envelope = Envelope::new("generic");
        envelope.response_to = Some("123-0".to_string());
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::ResponseEventSuffix(_))
        ));

        envelope.event = "generic_response".to_string();
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn dict_interface_prefers_declared_then_extra() {
        let mut envelope = Envelope::new("generic");
        envelope
            .extra
            .insert("hoopla".to_string(), serde_json::json!("HOOPLA"));

        assert_eq!(
            envelope.get("event"),
            Some(serde_json::Value::String("generic".to_string()))
        );
        assert_eq!(
            envelope.get("hoopla"),
            Some(serde_json::json!("HOOPLA"))
        );
        assert_eq!(envelope.keys()[0], "event");
        assert!(envelope.keys().contains(&"hoopla".to_string()));
    }
}
