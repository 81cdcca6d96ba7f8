//! Application wiring: turns a parsed [`Configuration`] plus an
//! operator-populated [`HandlerRegistry`] into a running fleet of
//! [`ListenerRuntime`]s, per spec.md §4's "one running process owns many
//! listeners, one shutdown signal" shape and §4.6's master-stream autowire.

use std::collections::HashMap;
use std::sync::Arc;

use fluxbus_config::Configuration;
use fluxbus_consumer::identity::{self, ListenerClass};
use fluxbus_consumer::{Consumer, DEFAULT_BLOCK_MS};
use fluxbus_runtime::{
    CodeDesignation, DispatchTarget, Handler, HandlerRegistry, ListenerRuntime, RuntimeFacade,
    ShutdownHandle,
};
use fluxbus_store::{RedisStreamStore, StreamStore};
use fluxbus_types::Registry;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("listener '{0}' names handler '{1}.{2}', which is not registered")]
    UnresolvedHandler(String, String, String),
    #[error(transparent)]
    Credentials(#[from] fluxbus_config::CredentialsError),
    #[error(transparent)]
    Store(#[from] fluxbus_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A fully wired fleet instance: the listener tasks it spawned and the
/// shutdown handle they all share.
pub struct Instance {
    pub application_name: String,
    pub application_instance: String,
    pub shutdown: ShutdownHandle,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Instance {
    /// Request every listener of this instance stop polling, then wait for
    /// them to finish their current batch and tear down their consumers.
    pub async fn shutdown(self) {
        self.shutdown.close();
        for task in self.tasks {
            let _ = task.await;
        }
    }

    /// Block until every listener task exits on its own (normally only
    /// happens after [`ShutdownHandle::close`] is called, e.g. by a
    /// `close_streams` request answered by the master listener).
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Build and spawn one listener per configured Bus Listener and Handler
/// Group, plus a synthesized listener on the master stream carrying every
/// autowired [`fluxbus_runtime::MasterHandler`] `registry` knows about.
///
/// `application_instance` distinguishes this running process from its
/// siblings; callers typically pass a freshly generated UUID.
pub async fn spawn(
    config: &Configuration,
    registry: &HandlerRegistry,
    defaults: &fluxbus_config::RuntimeDefaults,
    application_instance: String,
) -> Result<Instance> {
    let shutdown = ShutdownHandle::new();
    let mut tasks = Vec::new();

    for listener in &config.bus_listeners {
        let mut handlers = HashMap::new();
        for (event, designations) in &listener.handlers {
            let mut resolved = Vec::with_capacity(designations.len());
            for d in designations {
                resolved.push(resolve_designation(registry, listener.common.name.as_str(), d)?);
            }
            handlers.insert(event.clone(), resolved);
        }

        let target = DispatchTarget::Bus { handlers };
        tasks.push(
            spawn_listener(
                config,
                &listener.common,
                ListenerClass::Bus,
                target,
                defaults,
                &application_instance,
                shutdown.clone(),
            )
            .await?,
        );
    }

    for group in &config.handler_groups {
        let designation = resolve_designation(registry, group.common.name.as_str(), &group.designation)?;
        let target = DispatchTarget::Group {
            event: group.event.clone(),
            designation,
        };
        tasks.push(
            spawn_listener(
                config,
                &group.common,
                ListenerClass::Group,
                target,
                defaults,
                &application_instance,
                shutdown.clone(),
            )
            .await?,
        );
    }

    let master_handlers = registry.master_handlers();
    if !master_handlers.is_empty() {
        let mut handlers: HashMap<String, Vec<CodeDesignation>> = HashMap::new();
        for (names, handler) in master_handlers {
            let handler_dyn: Arc<dyn Handler> = handler.clone();
            let designation = CodeDesignation::new(
                "master",
                handler.event_name(),
                serde_json::Map::new(),
                None,
                handler_dyn,
            );
            for name in names {
                handlers.entry(name.to_string()).or_default().push(designation.clone());
            }
        }

        let common = fluxbus_config::ListenerCommon {
            name: "master".to_string(),
            stream: Some(defaults.master_stream.clone()),
            unique: true,
            credentials: None,
            verbose: false,
        };
        tasks.push(
            spawn_listener(
                config,
                &common,
                ListenerClass::Bus,
                DispatchTarget::Bus { handlers },
                defaults,
                &application_instance,
                shutdown.clone(),
            )
            .await?,
        );
    }

    Ok(Instance {
        application_name: config.application_name.clone(),
        application_instance,
        shutdown,
        tasks,
    })
}

fn resolve_designation(
    registry: &HandlerRegistry,
    listener_name: &str,
    designation: &fluxbus_config::CodeDesignationConfig,
) -> Result<CodeDesignation> {
    registry
        .resolve(&designation.module, &designation.name)
        .map(|handler| {
            CodeDesignation::new(
                designation.module.clone(),
                designation.name.clone(),
                designation.kwargs.clone(),
                designation.message_variant.clone(),
                handler,
            )
        })
        .map_err(|_| {
            Error::UnresolvedHandler(
                listener_name.to_string(),
                designation.module.clone(),
                designation.name.clone(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxbus_config::CodeDesignationConfig;
    use fluxbus_runtime::FnHandler;

    #[test]
    fn resolves_configured_designation_against_the_registry() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "app",
            "echo",
            Arc::new(FnHandler(|_: &RuntimeFacade, _, _| async { Ok(None) })),
        );

        let config = CodeDesignationConfig {
            module: "app".to_string(),
            name: "echo".to_string(),
            kwargs: serde_json::Map::new(),
            message_variant: None,
        };

        let designation = resolve_designation(&registry, "bus", &config).unwrap();
        assert_eq!(designation.module, "app");
        assert_eq!(designation.name, "echo");
    }

    #[test]
    fn unresolved_designation_names_the_owning_listener() {
        let registry = HandlerRegistry::new();
        let config = CodeDesignationConfig {
            module: "app".to_string(),
            name: "missing".to_string(),
            kwargs: serde_json::Map::new(),
            message_variant: None,
        };

        let err = resolve_designation(&registry, "bus", &config).unwrap_err();
        assert!(matches!(err, Error::UnresolvedHandler(listener, module, name)
            if listener == "bus" && module == "app" && name == "missing"));
    }
}

#[allow(clippy::too_many_arguments)]
async fn spawn_listener(
    config: &Configuration,
    common: &fluxbus_config::ListenerCommon,
    class: ListenerClass,
    target: DispatchTarget,
    defaults: &fluxbus_config::RuntimeDefaults,
    application_instance: &str,
    shutdown: ShutdownHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let stream = config.resolve_stream(&common.stream).to_string();
    let credentials = config.resolve_credentials(&common.credentials);
    let store: Arc<dyn StreamStore> = Arc::new(RedisStreamStore::connect(&credentials.redis_url()?).await?);

    let group = identity::group_name(
        &defaults.key_separator,
        &stream,
        &config.application_name,
        class,
        &common.name,
        common.unique,
        application_instance,
    );
    let consumer_name = identity::consumer_name(
        &defaults.key_separator,
        &stream,
        &config.application_name,
        application_instance,
        class,
        &common.name,
    );

    let consumer = Consumer::new(store.clone(), stream.clone(), group, consumer_name)
        .with_max_idle_ms(defaults.idle_time_ms);

    let runtime = RuntimeFacade {
        application_name: config.application_name.clone(),
        application_instance: application_instance.to_string(),
        stream,
        store,
        shutdown: None,
    };

    let listener = ListenerRuntime::with_shutdown(
        consumer,
        runtime,
        fluxbus_types::default_registry(),
        target,
        defaults.key_lifetime_seconds,
        defaults.max_handler_attempts,
        defaults.max_length,
        DEFAULT_BLOCK_MS,
        shutdown,
    );

    Ok(tokio::spawn(listener.run()))
}

/// A [`Registry`] pre-populated with the built-in control-plane variants,
/// exposed so a binary can extend it with operator-defined message types
/// before building an [`Instance`] by hand instead of going through
/// [`spawn`].
pub fn default_message_registry() -> Registry {
    fluxbus_types::default_registry()
}
