//! `get_instance` (alias `info`): each receiving instance reports its
//! identity, per spec.md §4.7.

use async_trait::async_trait;
use fluxbus_runtime::{Handler, MasterHandler, RuntimeFacade};
use fluxbus_types::builtin::GetInstanceResponse;
use fluxbus_types::{DynMessage, Envelope};

pub struct GetInstanceHandler;

#[async_trait]
impl Handler for GetInstanceHandler {
    async fn call(
        &self,
        runtime: &RuntimeFacade,
        message: &dyn DynMessage,
        _kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<Box<dyn DynMessage>>> {
        let mut envelope = Envelope::new("get_instance_response");
        envelope.response_to = message.envelope().message_id.clone();

        let response = GetInstanceResponse {
            envelope,
            application_name: runtime.application_name.clone(),
            application_instance: runtime.application_instance.clone(),
            listening: runtime.shutdown.as_ref().is_some_and(|s| s.keep_polling()),
        };
        Ok(Some(Box::new(response)))
    }
}

impl MasterHandler for GetInstanceHandler {
    fn event_name(&self) -> &'static str {
        "get_instance"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["info"]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fluxbus_store::{MockStore, StreamStore};
    use fluxbus_types::builtin::GetInstanceMessage;

    use super::*;

    #[tokio::test]
    async fn reports_local_identity() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        let runtime = RuntimeFacade {
            application_name: "svc".to_string(),
            application_instance: "inst-1".to_string(),
            stream: "MASTER".to_string(),
            store,
            shutdown: None,
        };
        let message = GetInstanceMessage {
            envelope: Envelope::new("get_instance"),
        };

        let response = GetInstanceHandler
            .call(&runtime, &message, &serde_json::Map::new())
            .await
            .unwrap()
            .expect("get_instance always answers");

        let value = response.to_value();
        assert_eq!(value["application_name"], serde_json::json!("svc"));
        assert_eq!(value["application_instance"], serde_json::json!("inst-1"));
        assert_eq!(value["event"], serde_json::json!("get_instance_response"));
    }
}
