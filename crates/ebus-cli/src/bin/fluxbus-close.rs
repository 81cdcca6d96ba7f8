//! `fluxbus-close`: broadcast `get_instance` on the master stream, collect
//! responses for a short window, then send a token-bearing `close` request
//! to whichever instance(s) answered (optionally filtered by name/instance),
//! per spec.md §4.7.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fluxbus_cli_common::{init_logging, LogArgs, OrBail};
use fluxbus_config::{Configuration, RuntimeDefaults};
use fluxbus_store::{RedisStreamStore, StreamStore};
use fluxbus_types::Envelope;

#[derive(Debug, Parser)]
#[command(name = "fluxbus-close", about = "Stop a running fluxbus instance's listeners")]
struct Args {
    /// Path to the JSON configuration document, for store connection details.
    configuration_path: PathBuf,

    /// Master stream to broadcast on. Falls back to the document/env default.
    #[arg(long)]
    stream: Option<String>,

    /// Only close instances with this application name.
    #[arg(long = "application-name")]
    application_name: Option<String>,

    /// Only close this specific application instance.
    #[arg(long = "application-instance")]
    application_instance: Option<String>,

    /// How long to wait for `get_instance_response`s before sending `close`.
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log);

    let config = Configuration::parse_path(&args.configuration_path)
        .or_bail("failed to read or parse configuration document");
    let defaults = RuntimeDefaults::from_env();
    let Some(close_token) = defaults.close_token.clone() else {
        tracing::error!("EVENT_BUS_CLOSE_TOKEN must be set to issue a close request");
        std::process::exit(1);
    };

    let stream = args.stream.clone().unwrap_or_else(|| defaults.master_stream.clone());

    let store = RedisStreamStore::connect(&config.default_credentials.redis_url().or_bail("failed to build store connection URL"))
        .await
        .or_bail("failed to connect to the store");

    let request_id = uuid::Uuid::new_v4().to_string();
    let mut request = Envelope::new("get_instance");
    request.message_id = Some(request_id.clone());
    let fields = fluxbus_types::to_wire_fields(&serde_json::to_value(&request).expect("Envelope always serializes"));
    let field_refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    store.add(&stream, None, &field_refs).await.or_bail("failed to publish get_instance");

    tokio::time::sleep(Duration::from_millis(args.wait_ms)).await;

    let recent = store.revrange(&stream, "+", "-", 500).await.or_bail("failed to read recent stream entries");
    let mut matched = Vec::new();
    for entry in &recent {
        let fields = fluxbus_types::decode_fields(entry.fields.iter().cloned());
        if fields.get("event").and_then(|v| v.as_str()) != Some("get_instance_response") {
            continue;
        }
        if fields.get("response_to").and_then(|v| v.as_str()) != Some(request_id.as_str()) {
            continue;
        }
        let Some(name) = fields.get("application_name").and_then(|v| v.as_str()) else { continue };
        let Some(instance) = fields.get("application_instance").and_then(|v| v.as_str()) else { continue };

        if let Some(want) = &args.application_name {
            if want != name {
                continue;
            }
        }
        if let Some(want) = &args.application_instance {
            if want != instance {
                continue;
            }
        }
        matched.push((name.to_string(), instance.to_string()));
    }

    if matched.is_empty() {
        tracing::warn!("no matching instance answered get_instance within the wait window");
        return;
    }

    for (name, instance) in matched {
        let mut close = Envelope::new("close");
        close.application_name = Some(name.clone());
        close.application_instance = Some(instance.clone());
        let mut fields = fluxbus_types::to_wire_fields(&serde_json::to_value(&close).expect("Envelope always serializes"));
        fields.push(("token".to_string(), close_token.clone()));
        let field_refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        store.add(&stream, None, &field_refs).await.or_bail("failed to publish close request");
        tracing::info!(application = %name, instance = %instance, "sent close request");
    }
}
