//! Per-batch message dispatch, per spec.md §4.4: decode payload, parse into
//! a concrete variant, invoke the configured handler(s) with progress
//! tracking, publish any handler response, ack or release the message.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use fluxbus_consumer::Consumer;
use fluxbus_lock::Scope;
use fluxbus_store::StreamEntry;
use fluxbus_types::{to_wire_fields, DynMessage, Registry};

use crate::designation::CodeDesignation;
use crate::handler::RuntimeFacade;
use crate::progress::{progress_key, ProgressTracker};

const LOCK_TTL_MS: u64 = 30_000;
const LOCK_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Consumer(#[from] fluxbus_consumer::Error),
    #[error(transparent)]
    Lock(#[from] fluxbus_lock::Error),
    #[error(transparent)]
    Progress(#[from] crate::progress::Error),
    #[error(transparent)]
    Store(#[from] fluxbus_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a configured listener dispatches against, per spec.md §3's Bus
/// Listener / Handler Group polymorphism.
pub enum DispatchTarget {
    /// Many events, each with an ordered list of handlers run concurrently
    /// against every "still owed" progress entry.
    Bus {
        handlers: HashMap<String, Vec<CodeDesignation>>,
    },
    /// Exactly one event and one handler; messages for any other event are
    /// immediately marked complete (not this listener's responsibility).
    Group {
        event: String,
        designation: CodeDesignation,
    },
}

/// Everything a batch dispatch needs besides the entries themselves.
pub struct DispatchContext<'a> {
    pub consumer: &'a Consumer,
    pub runtime: &'a RuntimeFacade,
    pub registry: &'a StdMutex<Registry>,
    pub target: &'a DispatchTarget,
    pub progress_ttl_secs: u64,
    pub max_handler_attempts: u32,
    pub response_max_len: u64,
}

/// Decode a batch's raw stream fields into a JSON object, per spec.md §4.4's
/// field-coercion rule.
pub fn decode_payload(entry: &StreamEntry) -> serde_json::Value {
    let decoded = fluxbus_types::decode_fields(entry.fields.iter().cloned());
    serde_json::Value::Object(decoded)
}

/// Dispatch every entry in a batch concurrently, per spec.md §4.4's loop
/// ("dispatch each (id, payload) concurrently ... await all dispatches").
pub async fn dispatch_batch(ctx: &DispatchContext<'_>, entries: Vec<StreamEntry>, scope: &Scope) {
    let dispatches = entries.into_iter().map(|entry| dispatch_one(ctx, entry, scope));
    futures::future::join_all(dispatches).await;
}

async fn dispatch_one(ctx: &DispatchContext<'_>, entry: StreamEntry, scope: &Scope) {
    let message_id = entry.id.clone();
    let value = decode_payload(&entry);

    let parsed = {
        let mut registry = ctx.registry.lock().expect("registry mutex poisoned");
        registry.parse(value)
    };

    let message = match parsed {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(message_id = %message_id, error = %err, "failed to parse message payload, skipping");
            return;
        }
    };

    let outcome = match ctx.target {
        DispatchTarget::Bus { handlers } => dispatch_bus(ctx, &message_id, message.as_ref(), handlers, scope).await,
        DispatchTarget::Group { event, designation } => {
            dispatch_group(ctx, &message_id, message.as_ref(), event, designation).await
        }
    };

    let responses = match outcome {
        Ok(responses) => responses,
        Err(err) => {
            tracing::error!(message_id = %message_id, error = %err, "dispatch failed");
            return;
        }
    };

    let publishes = responses
        .into_iter()
        .map(|response| publish_response(ctx, &message_id, response));
    futures::future::join_all(publishes).await;
}

/// Bus Listener dispatch: progress-tracked, possibly-multi-handler fan-out
/// for a single event, per spec.md §4.4.
async fn dispatch_bus(
    ctx: &DispatchContext<'_>,
    message_id: &str,
    message: &dyn DynMessage,
    handlers: &HashMap<String, Vec<CodeDesignation>>,
    scope: &Scope,
) -> Result<Vec<Box<dyn DynMessage>>> {
    let event = message.envelope().event.clone();
    let Some(designations) = handlers.get(&event) else {
        tracing::warn!(%event, message_id, "no handler registered for event");
        return Ok(Vec::new());
    };

    let group_name = ctx.consumer.group();
    let key = progress_key(message_id, group_name);
    let handler_ids: Vec<String> = designations.iter().map(|d| d.identifier()).collect();

    let lock_key = fluxbus_lock::lock_key(ctx.consumer.stream(), group_name, Some(message_id));
    let guard = fluxbus_lock::acquire(
        ctx.runtime.store.clone(),
        &lock_key,
        scope,
        LOCK_TTL_MS,
        LOCK_TIMEOUT_MS,
    )
    .await?;

    let tracker = ProgressTracker::new(ctx.runtime.store.as_ref(), ctx.progress_ttl_secs, ctx.max_handler_attempts);
    let entries = tracker.seed_and_read(&key, &handler_ids).await?;
    let owed: Vec<String> = tracker
        .still_owed(&entries, &handler_ids)
        .into_iter()
        .cloned()
        .collect();

    guard.release().await?;

    let mut responses = Vec::new();
    for (designation, handler_id) in designations.iter().zip(handler_ids.iter()) {
        if !owed.contains(handler_id) {
            continue;
        }

        match designation.handler().call(ctx.runtime, message, &designation.kwargs).await {
            Ok(response) => {
                tracker.mark_handler_complete(&key, handler_id).await?;
                if let Some(response) = response {
                    responses.push(response);
                }
            }
            Err(err) => {
                tracing::error!(message_id, handler = %handler_id, error = %err, "handler invocation failed");
                tracker.mark_handler_attempt(&key, handler_id).await?;
            }
        }
    }

    if tracker.all_resolved(&key, &handler_ids).await? {
        ctx.consumer.mark_complete(message_id, &key, true).await?;
    } else {
        ctx.consumer.release(message_id, None).await?;
    }

    Ok(responses)
}

/// Handler Group dispatch: one event, one handler, no progress map — a
/// single delivery either completes or releases, per spec.md §4.4.
async fn dispatch_group(
    ctx: &DispatchContext<'_>,
    message_id: &str,
    message: &dyn DynMessage,
    event: &str,
    designation: &CodeDesignation,
) -> Result<Vec<Box<dyn DynMessage>>> {
    let key = progress_key(message_id, ctx.consumer.group());

    if message.envelope().event != event {
        ctx.consumer.mark_complete(message_id, &key, true).await?;
        return Ok(Vec::new());
    }

    match designation.handler().call(ctx.runtime, message, &designation.kwargs).await {
        Ok(response) => {
            ctx.consumer.mark_complete(message_id, &key, true).await?;
            Ok(response.into_iter().collect())
        }
        Err(err) => {
            tracing::error!(message_id, error = %err, "handler group invocation failed");
            ctx.consumer.release(message_id, None).await?;
            Ok(Vec::new())
        }
    }
}

/// Stamp `response_to` if unset and publish the response onto the
/// listener's own stream, trimming to `response_max_len`, per spec.md §4.4's
/// "Responses" rule.
async fn publish_response(ctx: &DispatchContext<'_>, request_id: &str, mut response: Box<dyn DynMessage>) {
    {
        let envelope = response.envelope_mut();
        if envelope.response_to.is_none() {
            envelope.response_to = Some(request_id.to_string());
        }
    }

    let value = response.to_value();
    let fields = to_wire_fields(&value);
    let field_refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    match ctx.runtime.store.add(&ctx.runtime.stream, None, &field_refs).await {
        Ok(_) => {
            if let Err(err) = ctx.runtime.store.trim(&ctx.runtime.stream, ctx.response_max_len).await {
                tracing::warn!(error = %err, "failed to trim stream after publishing response");
            }
        }
        Err(err) => tracing::error!(error = %err, "failed to publish handler response"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use fluxbus_store::{MockStore, StreamStore};
    use fluxbus_types::builtin::GenericMessage;
    use fluxbus_types::Envelope;

    use super::*;
    use crate::handler::{FnHandler, Handler};
    use crate::registry::HandlerRegistry;

    fn facade(store: Arc<dyn StreamStore>, stream: &str) -> RuntimeFacade {
        RuntimeFacade {
            application_name: "app".to_string(),
            application_instance: "i1".to_string(),
            stream: stream.to_string(),
            store,
            shutdown: None,
        }
    }

    #[tokio::test]
    async fn bus_dispatch_round_trips_generic_message() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        store.add("EVENTS", None, &[("event", "generic"), ("hoopla", "HOOPLA"), ("data", r#"{"a":1}"#)])
            .await
            .unwrap();

        let scope = Scope::new();
        let mut consumer = Consumer::new(store.clone(), "EVENTS", "g", "c");
        consumer.create(&scope).await.unwrap();
        let batch = consumer.read(&scope, 10, &Default::default()).await.unwrap();
        assert_eq!(batch.len(), 1);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "app",
            "echo",
            Arc::new(FnHandler(move |_: &RuntimeFacade, message: &dyn DynMessage, _: &serde_json::Map<String, serde_json::Value>| {
                let seen = seen_clone.clone();
                let event = message.envelope().event.clone();
                let hoopla = message.get("hoopla");
                let data = message.get("data");
                async move {
                    seen.lock().unwrap().push((event, hoopla, data));
                    Ok(None)
                }
            })),
        );

        let designation = CodeDesignation::new(
            "app",
            "echo",
            serde_json::Map::new(),
            None,
            registry.resolve("app", "echo").unwrap(),
        );
        let mut handlers = HashMap::new();
        handlers.insert("generic".to_string(), vec![designation]);
        let target = DispatchTarget::Bus { handlers };

        let parser = StdMutex::new({
            let mut r = Registry::new();
            r.register::<GenericMessage>();
            r.register::<Envelope>();
            r
        });

        let runtime = facade(store.clone(), "EVENTS");
        let ctx = DispatchContext {
            consumer: &consumer,
            runtime: &runtime,
            registry: &parser,
            target: &target,
            progress_ttl_secs: 7_200,
            max_handler_attempts: 5,
            response_max_len: 100,
        };

        dispatch_batch(&ctx, batch, &scope).await;

        let invocations = seen.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].0, "generic");
        assert_eq!(invocations[0].1, Some(serde_json::json!("HOOPLA")));
        assert_eq!(invocations[0].2, Some(serde_json::json!({"a": 1})));

        assert_eq!(store.pending_summary("EVENTS", "g").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn bus_dispatch_with_no_handler_leaves_message_pending() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        store.add("EVENTS", None, &[("event", "unhandled")]).await.unwrap();

        let scope = Scope::new();
        let mut consumer = Consumer::new(store.clone(), "EVENTS", "g", "c");
        consumer.create(&scope).await.unwrap();
        let batch = consumer.read(&scope, 10, &Default::default()).await.unwrap();

        let target = DispatchTarget::Bus { handlers: HashMap::new() };
        let parser = StdMutex::new({
            let mut r = Registry::new();
            r.register::<Envelope>();
            r
        });
        let runtime = facade(store.clone(), "EVENTS");
        let ctx = DispatchContext {
            consumer: &consumer,
            runtime: &runtime,
            registry: &parser,
            target: &target,
            progress_ttl_secs: 7_200,
            max_handler_attempts: 5,
            response_max_len: 100,
        };

        dispatch_batch(&ctx, batch, &scope).await;

        assert_eq!(store.pending_summary("EVENTS", "g").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn handler_group_ignores_non_matching_event() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        store.add("EVENTS", None, &[("event", "other")]).await.unwrap();

        let scope = Scope::new();
        let mut consumer = Consumer::new(store.clone(), "EVENTS", "g", "c");
        consumer.create(&scope).await.unwrap();
        let batch = consumer.read(&scope, 10, &Default::default()).await.unwrap();

        let handler: Arc<dyn Handler> = Arc::new(FnHandler(|_: &RuntimeFacade, _: &dyn DynMessage, _: &serde_json::Map<String, serde_json::Value>| async {
            panic!("should not be invoked for a mismatched event");
            #[allow(unreachable_code)]
            Ok(None)
        }));
        let designation = CodeDesignation::new("app", "close", serde_json::Map::new(), None, handler);
        let target = DispatchTarget::Group { event: "close".to_string(), designation };

        let parser = StdMutex::new({
            let mut r = Registry::new();
            r.register::<Envelope>();
            r
        });
        let runtime = facade(store.clone(), "EVENTS");
        let ctx = DispatchContext {
            consumer: &consumer,
            runtime: &runtime,
            registry: &parser,
            target: &target,
            progress_ttl_secs: 7_200,
            max_handler_attempts: 5,
            response_max_len: 100,
        };

        dispatch_batch(&ctx, batch, &scope).await;

        assert_eq!(store.pending_summary("EVENTS", "g").await.unwrap().count, 0);
    }
}
