//! The per-listener poll loop: read → dispatch → repeat, with cooperative
//! and hard-cancelling shutdown, per spec.md §4.4's Loop and §5's
//! Cancellation & timeouts.
//!
//! Grounded on `automations/src/server.rs`'s `serve()`: a plain
//! `tokio::select!` racing a read future against a `tokio::pin!`-ed
//! shutdown notification, the teacher's idiom for a cancellable poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use fluxbus_consumer::Consumer;
use fluxbus_lock::Scope;
use fluxbus_types::Registry;

use crate::dispatch::{self, DispatchContext, DispatchTarget};
use crate::handler::RuntimeFacade;

/// Shared shutdown state for one listener.
///
/// `stop_polling` is cooperative: the loop finishes dispatching whatever
/// batch it already read, removes its consumer, and exits. `close`
/// additionally wakes a pending blocking read so the loop exits without
/// waiting out `block_ms`.
#[derive(Clone)]
pub struct ShutdownHandle {
    keep_polling: Arc<AtomicBool>,
    cancel: Arc<tokio::sync::Notify>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        ShutdownHandle {
            keep_polling: Arc::new(AtomicBool::new(true)),
            cancel: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn stop_polling(&self) {
        self.keep_polling.store(false, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.stop_polling();
        self.cancel.notify_waiters();
    }

    /// Whether this listener's loop is still meant to be polling — used by
    /// `get_instance`'s `listening` reply field as well as the loop itself.
    pub fn keep_polling(&self) -> bool {
        self.keep_polling.load(Ordering::SeqCst)
    }
}

/// Owns one configured listener's consumer and dispatch wiring, and drives
/// its poll loop per spec.md §4.4.
pub struct ListenerRuntime {
    consumer: Consumer,
    runtime: RuntimeFacade,
    parser: StdMutex<Registry>,
    target: DispatchTarget,
    progress_ttl_secs: u64,
    max_handler_attempts: u32,
    response_max_len: u64,
    block_ms: u64,
    shutdown: ShutdownHandle,
}

impl ListenerRuntime {
    /// Build a listener runtime with a fresh, independent shutdown handle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: Consumer,
        runtime: RuntimeFacade,
        parser: Registry,
        target: DispatchTarget,
        progress_ttl_secs: u64,
        max_handler_attempts: u32,
        response_max_len: u64,
        block_ms: u64,
    ) -> (Self, ShutdownHandle) {
        let shutdown = ShutdownHandle::new();
        let listener = Self::with_shutdown(
            consumer,
            runtime,
            parser,
            target,
            progress_ttl_secs,
            max_handler_attempts,
            response_max_len,
            block_ms,
            shutdown.clone(),
        );
        (listener, shutdown)
    }

    /// Build a listener runtime against an already-existing [`ShutdownHandle`],
    /// so several listeners belonging to the same running instance can share
    /// one shutdown signal — the shape `fluxbus-cli`'s application wiring
    /// needs so a `close_streams` request answered by the master-stream
    /// listener stops every listener of this instance, not just itself
    /// (spec.md §4.7: "instance stops polling", not "one listener stops").
    #[allow(clippy::too_many_arguments)]
    pub fn with_shutdown(
        consumer: Consumer,
        mut runtime: RuntimeFacade,
        parser: Registry,
        target: DispatchTarget,
        progress_ttl_secs: u64,
        max_handler_attempts: u32,
        response_max_len: u64,
        block_ms: u64,
        shutdown: ShutdownHandle,
    ) -> Self {
        runtime.shutdown = Some(shutdown.clone());
        ListenerRuntime {
            consumer,
            runtime,
            parser: StdMutex::new(parser),
            target,
            progress_ttl_secs,
            max_handler_attempts,
            response_max_len,
            block_ms,
            shutdown,
        }
    }

    /// Create the consumer, then read/dispatch batches until told to stop,
    /// then remove the consumer — spec.md §4.4's full loop pseudocode.
    pub async fn run(mut self) {
        let scope = Scope::new();
        if let Err(err) = self.consumer.create(&scope).await {
            tracing::error!(error = %err, "failed to create consumer, listener exiting without polling");
            return;
        }

        while self.shutdown.keep_polling() {
            let cancelled = self.shutdown.cancel.notified();
            tokio::pin!(cancelled);

            let batch = tokio::select! {
                batch = self.consumer.read(&scope, self.block_ms, &Default::default()) => batch,
                () = &mut cancelled => {
                    tracing::info!(stream = %self.consumer.stream(), "listener closed mid-read");
                    break;
                }
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(error = %err, "consumer read failed, retrying after backoff");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            if batch.is_empty() {
                continue;
            }

            let ctx = DispatchContext {
                consumer: &self.consumer,
                runtime: &self.runtime,
                registry: &self.parser,
                target: &self.target,
                progress_ttl_secs: self.progress_ttl_secs,
                max_handler_attempts: self.max_handler_attempts,
                response_max_len: self.response_max_len,
            };
            dispatch::dispatch_batch(&ctx, batch, &scope).await;
        }

        tracing::info!(stream = %self.consumer.stream(), "listener polling loop stopped, removing consumer");
        if let Err(err) = self.consumer.remove().await {
            tracing::error!(error = %err, "failed to remove consumer during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use fluxbus_store::{MockStore, StreamStore};
    use fluxbus_types::Envelope;

    use super::*;
    use crate::designation::CodeDesignation;
    use crate::handler::{FnHandler, Handler};
    use crate::registry::HandlerRegistry;

    #[tokio::test]
    async fn close_cancels_an_in_flight_read_and_removes_the_consumer() {
        let store: Arc<dyn StreamStore> = Arc::new(MockStore::new());
        let consumer = Consumer::new(store.clone(), "EVENTS", "g", "c");
        let runtime = RuntimeFacade {
            application_name: "app".to_string(),
            application_instance: "i1".to_string(),
            stream: "EVENTS".to_string(),
            store: store.clone(),
            shutdown: None,
        };

        let mut registry = HandlerRegistry::new();
        let handler: Arc<dyn Handler> = Arc::new(FnHandler(|_: &RuntimeFacade, _: &dyn fluxbus_types::DynMessage, _: &serde_json::Map<String, serde_json::Value>| async {
            Ok(None)
        }));
        registry.register("app", "echo", handler);
        let designation = CodeDesignation::new("app", "echo", serde_json::Map::new(), None, registry.resolve("app", "echo").unwrap());
        let mut handlers = HashMap::new();
        handlers.insert("generic".to_string(), vec![designation]);

        let mut parser = Registry::new();
        parser.register::<Envelope>();

        let (listener, shutdown) = ListenerRuntime::new(
            consumer,
            runtime,
            parser,
            DispatchTarget::Bus { handlers },
            7_200,
            5,
            100,
            50,
        );

        let handle = tokio::spawn(listener.run());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.close();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("listener loop exited after close")
            .unwrap();
    }
}
