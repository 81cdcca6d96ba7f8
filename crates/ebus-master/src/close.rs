//! `close_streams` (alias `disconnect`): stop this instance's listener loop,
//! per spec.md §4.7/§4.4's Shutdown note.
//!
//! Only wired onto the master-stream Handler Group `fluxbus-runtime`
//! synthesizes for every [`MasterHandler`] (spec.md §4.6's autowire), so
//! reaching this handler at all already proves the receiving listener "may
//! make executive decisions" — regular bus listeners never see it. The
//! remaining two gates spec.md names are both enforced here: the bearer
//! `token` must match, and `application_name`/`application_instance` must
//! match the local identity exactly; either mismatch is a silent ignore,
//! not an error (a close addressed to a different fleet member is not this
//! instance's problem).

use async_trait::async_trait;
use fluxbus_runtime::{Handler, MasterHandler, RuntimeFacade};
use fluxbus_types::builtin::CloseMessage;
use fluxbus_types::DynMessage;

pub struct CloseHandler {
    expected_token: String,
}

impl CloseHandler {
    pub fn new(expected_token: impl Into<String>) -> Self {
        CloseHandler {
            expected_token: expected_token.into(),
        }
    }
}

#[async_trait]
impl Handler for CloseHandler {
    async fn call(
        &self,
        runtime: &RuntimeFacade,
        message: &dyn DynMessage,
        _kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<Box<dyn DynMessage>>> {
        let close: CloseMessage = serde_json::from_value(message.to_value())?;

        if close.token != self.expected_token {
            tracing::warn!(application = %runtime.application_name, "rejected close request: token mismatch");
            return Ok(None);
        }

        let targets_this_instance = close.envelope.application_name.as_deref() == Some(runtime.application_name.as_str())
            && close.envelope.application_instance.as_deref() == Some(runtime.application_instance.as_str());

        if !targets_this_instance {
            tracing::debug!(
                application = %runtime.application_name,
                instance = %runtime.application_instance,
                "ignoring close request addressed to a different instance"
            );
            return Ok(None);
        }

        if let Some(shutdown) = &runtime.shutdown {
            tracing::info!(application = %runtime.application_name, instance = %runtime.application_instance, "closing on remote request");
            shutdown.close();
        }
        Ok(None)
    }
}

impl MasterHandler for CloseHandler {
    fn event_name(&self) -> &'static str {
        "close"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["disconnect"]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fluxbus_runtime::ShutdownHandle;
    use fluxbus_store::{MockStore, StreamStore};
    use fluxbus_types::Envelope;

    use super::*;

    fn message(application_name: &str, application_instance: &str, token: &str) -> CloseMessage {
        let mut envelope = Envelope::new("close");
        envelope.application_name = Some(application_name.to_string());
        envelope.application_instance = Some(application_instance.to_string());
        CloseMessage {
            envelope,
            token: token.to_string(),
        }
    }

    fn runtime(store: Arc<dyn StreamStore>, shutdown: Option<ShutdownHandle>) -> RuntimeFacade {
        RuntimeFacade {
            application_name: "svc".to_string(),
            application_instance: "inst-1".to_string(),
            stream: "MASTER".to_string(),
            store,
            shutdown,
        }
    }

    #[tokio::test]
    async fn matching_identity_and_token_closes() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        let shutdown = ShutdownHandle::new();
        let rt = runtime(store, Some(shutdown.clone()));
        let msg = message("svc", "inst-1", "secret");

        CloseHandler::new("secret").call(&rt, &msg, &serde_json::Map::new()).await.unwrap();

        assert!(!shutdown.keep_polling());
    }

    #[tokio::test]
    async fn mismatched_instance_is_ignored() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        let shutdown = ShutdownHandle::new();
        let rt = runtime(store, Some(shutdown.clone()));
        let msg = message("svc", "inst-2", "secret");

        CloseHandler::new("secret").call(&rt, &msg, &serde_json::Map::new()).await.unwrap();

        assert!(shutdown.keep_polling());
    }

    #[tokio::test]
    async fn wrong_token_is_ignored() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        let shutdown = ShutdownHandle::new();
        let rt = runtime(store, Some(shutdown.clone()));
        let msg = message("svc", "inst-1", "not-the-secret");

        CloseHandler::new("secret").call(&rt, &msg, &serde_json::Map::new()).await.unwrap();

        assert!(shutdown.keep_polling());
    }
}
