//! `purge`: delete a consumer group's pending entries, per spec.md §4.7 —
//! "if the consumer is given, drain its pending messages to the inbox and
//! delete the consumer. Then: if the group has no pending messages, delete
//! it; if it has pending but `force`, delete anyway. All operations guarded
//! by the group lock."

use async_trait::async_trait;
use fluxbus_lock::Scope;
use fluxbus_runtime::{Handler, MasterHandler, RuntimeFacade};
use fluxbus_types::builtin::PurgeMessage;
use fluxbus_types::DynMessage;

const LOCK_TTL_MS: u64 = 30_000;
const LOCK_TIMEOUT_MS: u64 = 30_000;
const DRAIN_COUNT: usize = 10_000;

/// Well-known inbox consumer name entries are reassigned to on drain,
/// matching `fluxbus_consumer::DEFAULT_INBOX_NAME`.
const INBOX_NAME: &str = "inbox";

pub struct PurgeHandler;

#[async_trait]
impl Handler for PurgeHandler {
    async fn call(
        &self,
        runtime: &RuntimeFacade,
        message: &dyn DynMessage,
        _kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<Box<dyn DynMessage>>> {
        let purge: PurgeMessage = serde_json::from_value(message.to_value())?;
        let scope = Scope::new();

        let lock_key = fluxbus_lock::lock_key(&purge.stream, &purge.group, None);
        let guard = fluxbus_lock::acquire(
            runtime.store.clone(),
            &lock_key,
            &scope,
            LOCK_TTL_MS,
            LOCK_TIMEOUT_MS,
        )
        .await?;

        if let Some(consumer) = &purge.consumer {
            drain_consumer(runtime, &purge.stream, &purge.group, consumer).await?;
        }

        let remaining = runtime.store.pending_summary(&purge.stream, &purge.group).await?;
        if remaining.count == 0 {
            runtime.store.group_destroy(&purge.stream, &purge.group).await?;
            tracing::info!(stream = %purge.stream, group = %purge.group, "purged empty group");
        } else if purge.force {
            runtime.store.group_destroy(&purge.stream, &purge.group).await?;
            tracing::warn!(
                stream = %purge.stream,
                group = %purge.group,
                pending = remaining.count,
                "force-purged group with pending messages"
            );
        } else {
            tracing::warn!(
                stream = %purge.stream,
                group = %purge.group,
                pending = remaining.count,
                "refusing to purge group with pending messages (force not set)"
            );
        }

        guard.release().await?;
        Ok(None)
    }
}

impl MasterHandler for PurgeHandler {
    fn event_name(&self) -> &'static str {
        "purge"
    }
}

async fn drain_consumer(runtime: &RuntimeFacade, stream: &str, group: &str, consumer: &str) -> anyhow::Result<()> {
    let pending = runtime
        .store
        .pending_range(stream, group, 0, DRAIN_COUNT, Some(consumer))
        .await?;

    if !pending.is_empty() {
        let ids: Vec<&str> = pending.iter().map(|p| p.id.as_str()).collect();
        runtime.store.claim(stream, group, INBOX_NAME, 0, &ids).await?;
    }

    runtime.store.group_del_consumer(stream, group, consumer).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fluxbus_store::{GroupStart, MockStore, StreamStore};
    use fluxbus_types::Envelope;

    use super::*;

    fn runtime(store: Arc<dyn StreamStore>) -> RuntimeFacade {
        RuntimeFacade {
            application_name: "svc".to_string(),
            application_instance: "inst-1".to_string(),
            stream: "MASTER".to_string(),
            store,
            shutdown: None,
        }
    }

    #[tokio::test]
    async fn purges_an_idle_group() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        store.group_create("EVENTS", "g", GroupStart::Beginning, true).await.unwrap();

        let rt = runtime(store.clone());
        let message = PurgeMessage {
            envelope: Envelope::new("purge"),
            stream: "EVENTS".to_string(),
            group: "g".to_string(),
            consumer: None,
            force: false,
        };

        PurgeHandler.call(&rt, &message, &serde_json::Map::new()).await.unwrap();

        assert!(store.info_groups("EVENTS").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refuses_to_purge_pending_group_without_force() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        store.add("EVENTS", None, &[("event", "x")]).await.unwrap();
        store.group_create("EVENTS", "g", GroupStart::Beginning, true).await.unwrap();
        store.read_group("EVENTS", "g", "c", 10, None).await.unwrap();

        let rt = runtime(store.clone());
        let message = PurgeMessage {
            envelope: Envelope::new("purge"),
            stream: "EVENTS".to_string(),
            group: "g".to_string(),
            consumer: None,
            force: false,
        };

        PurgeHandler.call(&rt, &message, &serde_json::Map::new()).await.unwrap();

        assert_eq!(store.pending_summary("EVENTS", "g").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn drains_named_consumer_before_checking_pending() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        store.add("EVENTS", None, &[("event", "x")]).await.unwrap();
        store.group_create("EVENTS", "g", GroupStart::Beginning, true).await.unwrap();
        store.group_create_consumer("EVENTS", "g", INBOX_NAME).await.unwrap();
        store.read_group("EVENTS", "g", "worker", 10, None).await.unwrap();

        let rt = runtime(store.clone());
        let message = PurgeMessage {
            envelope: Envelope::new("purge"),
            stream: "EVENTS".to_string(),
            group: "g".to_string(),
            consumer: Some("worker".to_string()),
            force: true,
        };

        PurgeHandler.call(&rt, &message, &serde_json::Map::new()).await.unwrap();

        assert!(store.info_groups("EVENTS").await.unwrap().is_empty());
    }
}
