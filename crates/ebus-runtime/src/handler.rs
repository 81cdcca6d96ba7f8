//! The handler interface every operator-supplied (or built-in master)
//! callable must implement, per spec.md §4.4/§9's "declared handler
//! interface `(StoreConn, Runtime, Message, map<string,Any>) -> Message?`".
//!
//! Rust has no runtime signature inspection, so the validation spec.md
//! describes ("position 0 and 1 types must be compatible, `**kwargs` must
//! be accepted, return type must be compatible with the envelope type")
//! becomes a compile-time obligation: anything registered with
//! [`crate::registry::HandlerRegistry`] must implement this trait, and the
//! trait bound itself is the signature check spec.md's Design Notes call
//! for at registration time.

use std::sync::Arc;

use fluxbus_store::StreamStore;
use fluxbus_types::DynMessage;

use crate::listener::ShutdownHandle;

/// Identity and transport handed to every handler invocation — the `Runtime`
/// parameter of spec.md's handler signature.
///
/// `shutdown` is `Some` only for the listener a master handler's synthesized
/// Handler Group is attached to; it's how `close_streams` (spec.md §4.7)
/// flips that listener's poll loop off after confirming executive authority
/// and a matching local identity. Operator handlers never see it as `Some`
/// in practice, since only `fluxbus-master`'s handlers act on it.
#[derive(Clone)]
pub struct RuntimeFacade {
    pub application_name: String,
    pub application_instance: String,
    pub stream: String,
    pub store: Arc<dyn StreamStore>,
    pub shutdown: Option<ShutdownHandle>,
}

/// A registered, callable unit of handler code. Implementors are looked up
/// by `(module, name)` through [`crate::registry::HandlerRegistry`] and
/// invoked with `(store, runtime, message, kwargs)`, optionally returning a
/// response message to publish back onto the listener's stream.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn call(
        &self,
        runtime: &RuntimeFacade,
        message: &dyn DynMessage,
        kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<Box<dyn DynMessage>>>;
}

/// Adapts a plain async function into a [`Handler`], for the common case of
/// a stateless callable with no captured fields.
pub struct FnHandler<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(&RuntimeFacade, &dyn DynMessage, &serde_json::Map<String, serde_json::Value>) -> Fut
        + Send
        + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Option<Box<dyn DynMessage>>>> + Send,
{
    async fn call(
        &self,
        runtime: &RuntimeFacade,
        message: &dyn DynMessage,
        kwargs: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<Option<Box<dyn DynMessage>>> {
        (self.0)(runtime, message, kwargs).await
    }
}
