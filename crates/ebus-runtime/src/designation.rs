//! `CodeDesignation`: a late-bound reference to a registered [`crate::handler::Handler`],
//! per spec.md §3. Configuration carries `{module, name, kwargs,
//! message_variant?}`; resolution to the actual callable happens once, at
//! listener start, against the process's [`crate::registry::HandlerRegistry`]
//! (spec.md §9's Design Notes: "configuration strings must match registered
//! names, else configuration validation fails").

use std::sync::Arc;

use crate::handler::Handler;

/// A configured reference to a handler, plus the call-time extras spec.md
/// §3 names: `kwargs` (merged into every invocation) and an optional
/// `message_variant` the handler expects its input already resolved to.
#[derive(Clone)]
pub struct CodeDesignation {
    pub module: String,
    pub name: String,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    pub message_variant: Option<String>,
    resolved: Arc<dyn Handler>,
}

impl std::fmt::Debug for CodeDesignation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeDesignation")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("kwargs", &self.kwargs)
            .field("message_variant", &self.message_variant)
            .finish()
    }
}

impl CodeDesignation {
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        kwargs: serde_json::Map<String, serde_json::Value>,
        message_variant: Option<String>,
        resolved: Arc<dyn Handler>,
    ) -> Self {
        CodeDesignation {
            module: module.into(),
            name: name.into(),
            kwargs,
            message_variant,
            resolved,
        }
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.resolved
    }

    /// Stable key used in the progress map: `module.name[kwargs][variant]`,
    /// sorted so field order doesn't change the identity across restarts
    /// with unchanged configuration (spec.md §3's supplemental identifier
    /// definition, SPEC_FULL.md §3).
    pub fn identifier(&self) -> String {
        let mut kwargs: Vec<(String, String)> = self
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        kwargs.sort();
        let kwargs_str = kwargs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}.{}[{}][{}]",
            self.module,
            self.name,
            kwargs_str,
            self.message_variant.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, RuntimeFacade};

    fn noop_handler() -> Arc<dyn Handler> {
        Arc::new(FnHandler(|_: &RuntimeFacade, _, _| async { Ok(None) }))
    }

    #[test]
    fn identifier_is_stable_across_kwarg_insertion_order() {
        let mut a_kwargs = serde_json::Map::new();
        a_kwargs.insert("b".to_string(), serde_json::json!(2));
        a_kwargs.insert("a".to_string(), serde_json::json!(1));

        let mut b_kwargs = serde_json::Map::new();
        b_kwargs.insert("a".to_string(), serde_json::json!(1));
        b_kwargs.insert("b".to_string(), serde_json::json!(2));

        let a = CodeDesignation::new("mymodule", "echo", a_kwargs, None, noop_handler());
        let b = CodeDesignation::new("mymodule", "echo", b_kwargs, None, noop_handler());
        assert_eq!(a.identifier(), b.identifier());
    }
}
