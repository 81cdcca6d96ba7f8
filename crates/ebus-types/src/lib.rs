//! The fluxbus message model: a weighted, polymorphic envelope union that
//! lets a listener parse an incoming stream record into the most specific
//! registered shape, with a dict-like fallback for anything that doesn't
//! match a known variant.

pub mod builtin;
pub mod decode;
pub mod envelope;
pub mod registry;
pub mod response;
pub mod variant;
pub mod wire;

pub use decode::{decode_field, decode_fields};
pub use envelope::{Envelope, EnvelopeError, Header, StackFrame, DEFAULT_STACK_DEPTH};
pub use registry::{ParseError, RawInput, Registry};
pub use response::{create_response, respond_to_message};
pub use variant::{DynMessage, MessageVariant};
pub use wire::to_wire_fields;

/// Build a [`Registry`] pre-populated with every built-in control-plane
/// variant `fluxbus-master` dispatches on. Application code typically calls
/// this once at startup and then registers its own operator-defined variants
/// on top.
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register::<builtin::GenericMessage>();
    registry.register::<builtin::CloseMessage>();
    registry.register::<builtin::TrimMessage>();
    registry.register::<builtin::PurgeMessage>();
    registry.register::<builtin::GetInstanceMessage>();
    registry.register::<builtin::GetInstanceResponse>();
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_prefers_close_over_generic() {
        let mut registry = default_registry();
        let parsed = registry
            .parse(serde_json::json!({"event": "close", "token": "secret"}))
            .expect("parses");
        assert_eq!(
            parsed.variant_name(),
            std::any::type_name::<builtin::CloseMessage>()
        );
    }

    #[test]
    fn default_registry_falls_back_to_envelope_for_unknown_event() {
        let mut registry = default_registry();
        let parsed = registry
            .parse(serde_json::json!({"event": "some.custom.thing"}))
            .expect("parses");
        assert_eq!(
            parsed.variant_name(),
            std::any::type_name::<Envelope>()
        );
    }
}
