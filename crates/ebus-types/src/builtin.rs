//! Built-in message variants: the control-plane messages `fluxbus-master`
//! dispatches on, plus the catch-all `generic` variant. Grounded on
//! `original_source/event_stream/messages/master.py` (`CloseMessage`,
//! `TrimMessage`) and `handlers/master.py` (the `purge`/`get_instance`
//! behavior spec.md §4.7 describes at the protocol level without giving
//! wire shapes).

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::variant::MessageVariant;

macro_rules! envelope_variant {
    ($name:ident, $depth:expr, { $($field:ident : $ty:ty),* $(,)? }, required = [$($required:literal),* $(,)?]) => {
        #[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
        pub struct $name {
            #[serde(flatten)]
            pub envelope: Envelope,
            $(pub $field: $ty,)*
        }

        impl MessageVariant for $name {
            const DEPTH: u32 = $depth;

            fn required_fields() -> &'static [&'static str] {
                &[$($required),*]
            }

            fn declared_fields() -> &'static [&'static str] {
                &[$(stringify!($field)),*]
            }

            fn envelope(&self) -> &Envelope {
                &self.envelope
            }

            fn envelope_mut(&mut self) -> &mut Envelope {
                &mut self.envelope
            }
        }
    };
}

/// The catch-all variant: any envelope that carries a free-form `data`
/// object, mirroring the original's `GenericMessage`.
envelope_variant!(
    GenericMessage,
    2,
    { data: serde_json::Value },
    required = ["data"]
);

/// Request to close the bus. `token` is a bearer credential checked by the
/// handler (`bus.is_allowed_to_close()` in the original) before honoring the
/// request; accepted under the `close` event name or its `disconnect` alias
/// per `CLOSE_KEYWORDS`.
envelope_variant!(
    CloseMessage,
    3,
    { token: String },
    required = ["token"]
);

/// Request to trim a stream down to `count` entries (default
/// `DEFAULT_MAX_STREAM_LENGTH` when omitted), optionally archiving the
/// trimmed records to `output_path`/`filename` first.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TrimMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub save_output: bool,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub date_format: Option<String>,
}

impl MessageVariant for TrimMessage {
    const DEPTH: u32 = 3;
    const LITERAL_EVENT: Option<&'static str> = Some("trim");

    fn required_fields() -> &'static [&'static str] {
        &[]
    }

    fn declared_fields() -> &'static [&'static str] {
        &["count", "save_output", "output_path", "filename", "date_format"]
    }

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }
}

/// Request to purge (fully delete and recreate) a consumer group's pending
/// entries list. `consumer`, when given, is drained to the inbox and
/// deleted first; `force` bypasses the "only when idle" guard the listener
/// runtime otherwise applies.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PurgeMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub stream: String,
    pub group: String,
    #[serde(default)]
    pub consumer: Option<String>,
    #[serde(default)]
    pub force: bool,
}

impl MessageVariant for PurgeMessage {
    const DEPTH: u32 = 3;
    const LITERAL_EVENT: Option<&'static str> = Some("purge");

    fn required_fields() -> &'static [&'static str] {
        &["stream", "group"]
    }

    fn declared_fields() -> &'static [&'static str] {
        &["stream", "group", "consumer", "force"]
    }

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }
}

/// Request for a listener to report its identity and health, under the
/// `get_instance` event name or its `info` alias.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GetInstanceMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
}

impl MessageVariant for GetInstanceMessage {
    const DEPTH: u32 = 2;
    const LITERAL_EVENT: Option<&'static str> = Some("get_instance");

    fn required_fields() -> &'static [&'static str] {
        &[]
    }

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }
}

/// Reply to [`GetInstanceMessage`].
envelope_variant!(
    GetInstanceResponse,
    3,
    {
        application_name: String,
        application_instance: String,
        listening: bool,
    },
    required = ["application_name", "application_instance", "listening"]
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_message_count_is_optional() {
        let parsed: TrimMessage =
            serde_json::from_value(serde_json::json!({"event": "trim"})).expect("parses");
        assert_eq!(parsed.count, None);
        assert!(!parsed.save_output);
    }

    #[test]
    fn close_message_requires_token() {
        let result: Result<CloseMessage, _> =
            serde_json::from_value(serde_json::json!({"event": "close"}));
        assert!(result.is_err());
    }

    #[test]
    fn get_instance_message_only_matches_its_literal_event() {
        assert_eq!(
            GetInstanceMessage::LITERAL_EVENT,
            Some("get_instance"),
            "a literal event is required so unrelated events don't fall through to this variant"
        );
    }

    #[test]
    fn generic_message_data_is_reachable_through_the_dict_interface() {
        use crate::variant::DynMessage;

        let parsed: GenericMessage = serde_json::from_value(serde_json::json!({
            "event": "generic",
            "hoopla": "HOOPLA",
            "data": {"a": 1},
        }))
        .expect("parses");

        assert_eq!(parsed.get("data"), Some(serde_json::json!({"a": 1})));
        assert_eq!(parsed.get("hoopla"), Some(serde_json::json!("HOOPLA")));
        assert!(parsed.keys().contains(&"data".to_string()));
    }
}
