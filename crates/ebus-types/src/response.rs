//! Response construction helpers, per spec.md §4.5's "every handled message
//! may produce a response envelope addressed back to its sender."

use crate::builtin::GenericMessage;
use crate::envelope::Envelope;

/// Build a `{event}_response` envelope addressed back at `request`, copying
/// `message_id`/`workflow_id` forward and stamping `response_to`.
pub fn create_response(request: &Envelope, data: serde_json::Value) -> GenericMessage {
    let mut response_envelope = Envelope::new(format!("{}_response", request.event));
    response_envelope.response_to = request.message_id.clone();
    response_envelope.workflow_id = request.workflow_id.clone();
    response_envelope.application_name = request.application_name.clone();

    GenericMessage {
        envelope: response_envelope,
        data,
    }
}

/// Convenience wrapper returning the response as a plain [`Envelope`] (for
/// callers that only need the dict interface, not the typed `data` field).
pub fn respond_to_message(request: &Envelope, data: serde_json::Value) -> Envelope {
    let response = create_response(request, data.clone());
    let mut envelope = response.envelope;
    envelope.set("data", data);
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_event_carries_suffix_and_correlation() {
        let mut request = Envelope::new("trim");
        request.message_id = Some("42-0".to_string());
        request.workflow_id = Some("wf-1".to_string());

        let response = create_response(&request, serde_json::json!({"trimmed": 10}));
        assert_eq!(response.envelope.event, "trim_response");
        assert_eq!(response.envelope.response_to.as_deref(), Some("42-0"));
        assert_eq!(response.envelope.workflow_id.as_deref(), Some("wf-1"));
        assert!(response.envelope.validate().is_ok());
    }
}
