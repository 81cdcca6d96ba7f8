//! `fluxbus`: the runtime daemon. Parses a configuration document, validates
//! it, registers the built-in master handlers, and runs every configured
//! listener until told to stop or interrupted, per spec.md §4/§6/§7.

use std::path::PathBuf;

use clap::Parser;
use fluxbus_cli_common::{init_logging, LogArgs, OrBail};
use fluxbus_config::{env_defaults::EVENT_BUS_CLOSE_TOKEN, Configuration, RuntimeDefaults};
use fluxbus_runtime::HandlerRegistry;

#[derive(Debug, Parser)]
#[command(name = "fluxbus", about = "Run the configured fleet of event bus listeners")]
struct Args {
    /// Path to the JSON configuration document. Falls back to
    /// `MASTER_BUS_CONFIGURATION_PATH` when omitted.
    #[arg(env = "MASTER_BUS_CONFIGURATION_PATH")]
    configuration_path: PathBuf,

    /// Parse and validate the configuration, then exit without starting any listener.
    #[arg(long)]
    validate: bool,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log);

    let config = Configuration::parse_path(&args.configuration_path)
        .or_bail("failed to read or parse configuration document");

    let errors = config.validate();
    if !errors.is_empty() {
        for err in &errors {
            tracing::error!(error = %err, "configuration error");
        }
        std::process::exit(1);
    }

    if args.validate {
        tracing::info!("configuration is valid");
        return;
    }

    let defaults = RuntimeDefaults::from_env();
    let close_token = defaults.close_token.clone().unwrap_or_else(|| {
        tracing::warn!(
            env_var = EVENT_BUS_CLOSE_TOKEN,
            "no close token configured; close_streams requests will never be honored"
        );
        String::new()
    });

    let mut registry = HandlerRegistry::new();
    fluxbus_master::register_all(&mut registry, close_token);

    let application_instance = uuid::Uuid::new_v4().to_string();
    let instance = fluxbus_cli::spawn(&config, &registry, &defaults, application_instance)
        .await
        .or_bail("failed to start configured listeners");

    tracing::info!(
        application = %instance.application_name,
        instance = %instance.application_instance,
        "fluxbus running"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
        }
        () = wait_for_internal_shutdown(&instance) => {
            tracing::info!("all listeners stopped polling on their own, shutting down");
        }
    }

    instance.shutdown().await;
}

/// Resolves once every listener of this instance has stopped polling on its
/// own (e.g. answering a `close_streams` request), so the daemon also exits
/// cleanly without an interrupt signal.
async fn wait_for_internal_shutdown(instance: &fluxbus_cli::Instance) {
    loop {
        if !instance.shutdown.keep_polling() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
}
