//! Built-in control-plane handlers for the fleet-wide master stream, per
//! spec.md §4.7: `get_instance` (+ `info`), `close_streams` (+ `disconnect`),
//! `trim`, and `purge`. Each implements [`fluxbus_runtime::MasterHandler`]
//! so `fluxbus_runtime::HandlerRegistry::register_master` can autowire it
//! onto a synthesized `unique=true` Handler Group on the master stream.

mod close;
mod get_instance;
mod purge;
mod trim;

pub use close::CloseHandler;
pub use get_instance::GetInstanceHandler;
pub use purge::PurgeHandler;
pub use trim::{TrimHandler, DEFAULT_DATE_FORMAT, DEFAULT_EVENT_BUS_RECORD_DIRECTORY, DEFAULT_MAX_STREAM_LENGTH};

use std::sync::Arc;

use fluxbus_runtime::HandlerRegistry;

/// Register every built-in control-plane handler under the `master` module
/// namespace, autowiring each for master-stream dispatch.
pub fn register_all(registry: &mut HandlerRegistry, close_token: impl Into<String>) {
    registry.register_master("master", Arc::new(GetInstanceHandler));
    registry.register_master("master", Arc::new(CloseHandler::new(close_token)));
    registry.register_master("master", Arc::new(TrimHandler));
    registry.register_master("master", Arc::new(PurgeHandler));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_four_handlers_with_aliases() {
        let mut registry = HandlerRegistry::new();
        register_all(&mut registry, "secret");

        let wired = registry.master_handlers();
        assert_eq!(wired.len(), 4);

        let mut all_names: Vec<&str> = wired.iter().flat_map(|(names, _)| names.iter().copied()).collect();
        all_names.sort_unstable();
        assert_eq!(
            all_names,
            vec!["close", "disconnect", "get_instance", "info", "purge", "trim"]
        );
    }
}
