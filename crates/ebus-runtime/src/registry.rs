//! Process-wide table binding `(module, name)` strings to registered
//! [`Handler`] implementations, per spec.md §4.6/§9: "require explicit
//! registration at startup: a handler name -> function table populated by
//! the program; configuration strings must match registered names, else
//! configuration validation fails."
//!
//! Also resolves the master-handler autowire (spec.md §4.6): every
//! registered handler that opts in via [`MasterHandler`] is wrapped in a
//! synthesized `unique=true` Handler Group attached to the master stream.

use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::Handler;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no handler registered for module '{module}', name '{name}'")]
    Unresolved { module: String, name: String },
}

/// A built-in control-plane handler that additionally advertises the event
/// name(s) it should be autowired to. Implemented by `fluxbus-master`'s
/// handlers; operator-defined handlers only need [`Handler`].
pub trait MasterHandler: Handler {
    /// Canonical event name, lower-cased with underscores trimmed per
    /// spec.md §4.6 (the autowired function-name-to-event-name rule).
    fn event_name(&self) -> &'static str;

    /// Additional event names this handler also answers to (e.g. `close`'s
    /// `disconnect` alias, per `CLOSE_KEYWORDS` in SPEC_FULL.md §4.7).
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Binds handler names to implementations and resolves
/// [`crate::designation::CodeDesignation`]s from configuration.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    by_name: HashMap<(String, String), Arc<dyn Handler>>,
    master: Vec<Arc<dyn MasterHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator-defined handler under `(module, name)`.
    pub fn register(&mut self, module: impl Into<String>, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.by_name.insert((module.into(), name.into()), handler);
    }

    /// Register a built-in control-plane handler, making it both
    /// resolvable by name and eligible for master-stream autowire.
    pub fn register_master(&mut self, module: impl Into<String>, handler: Arc<dyn MasterHandler>) {
        let module = module.into();
        let name = normalize_event_name(handler.event_name());
        self.by_name.insert((module, name), handler.clone() as Arc<dyn Handler>);
        self.master.push(handler);
    }

    pub fn resolve(&self, module: &str, name: &str) -> Result<Arc<dyn Handler>, Error> {
        self.by_name
            .get(&(module.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::Unresolved {
                module: module.to_string(),
                name: name.to_string(),
            })
    }

    /// Every autowired master handler, each paired with the full set of
    /// event names (canonical + aliases) it should be dispatched under.
    pub fn master_handlers(&self) -> Vec<(Vec<&'static str>, Arc<dyn MasterHandler>)> {
        self.master
            .iter()
            .map(|handler| {
                let mut names = vec![handler.event_name()];
                names.extend(handler.aliases());
                (names, handler.clone())
            })
            .collect()
    }
}

/// `function name -> event name`: lower-cased, underscores trimmed, per
/// spec.md §4.6.
pub fn normalize_event_name(name: &str) -> String {
    name.to_ascii_lowercase().trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, RuntimeFacade};

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        async fn call(
            &self,
            _runtime: &RuntimeFacade,
            _message: &dyn fluxbus_types::DynMessage,
            _kwargs: &serde_json::Map<String, serde_json::Value>,
        ) -> anyhow::Result<Option<Box<dyn fluxbus_types::DynMessage>>> {
            Ok(None)
        }
    }

    impl MasterHandler for Echo {
        fn event_name(&self) -> &'static str {
            "get_instance"
        }
        fn aliases(&self) -> &'static [&'static str] {
            &["info"]
        }
    }

    #[test]
    fn resolves_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("app", "echo", Arc::new(FnHandler(|_: &RuntimeFacade, _, _| async { Ok(None) })));
        assert!(registry.resolve("app", "echo").is_ok());
        assert!(registry.resolve("app", "missing").is_err());
    }

    #[test]
    fn master_handler_autowires_under_canonical_name_and_aliases() {
        let mut registry = HandlerRegistry::new();
        registry.register_master("master", Arc::new(Echo));
        assert!(registry.resolve("master", "get_instance").is_ok());

        let wired = registry.master_handlers();
        assert_eq!(wired.len(), 1);
        assert_eq!(wired[0].0, vec!["get_instance", "info"]);
    }
}
