//! `fluxbus-clean-handler-records`: delete progress-tracking keys
//! (`<message_id>::<group_name>::progress`) belonging to an application,
//! older than a given bound, per spec.md §6's operational CLI tool list.

use clap::Parser;
use fluxbus_cli_common::{init_logging, LogArgs, OrBail};
use fluxbus_config::Configuration;
use fluxbus_store::{RedisStreamStore, StreamStore};

#[derive(Debug, Parser)]
#[command(name = "fluxbus-clean-handler-records", about = "Delete stale per-message progress records for an application")]
struct Args {
    configuration_path: std::path::PathBuf,

    /// Only progress keys whose group name embeds this application name are considered.
    application_name: String,

    /// Delete records for messages added before this RFC3339 timestamp; omit to delete all matching records.
    #[arg(long = "oldest-allowed")]
    oldest_allowed: Option<chrono::DateTime<chrono::Utc>>,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log);

    let config = Configuration::parse_path(&args.configuration_path).or_bail("failed to read or parse configuration document");
    let store = RedisStreamStore::connect(
        &config
            .default_credentials
            .redis_url()
            .or_bail("failed to build store connection URL"),
    )
    .await
    .or_bail("failed to connect to the store");

    let pattern = format!("*::*{}*::progress", args.application_name);
    let keys = store.keys(&pattern).await.or_bail("failed to enumerate progress keys");

    let bound_ms = args.oldest_allowed.map(|bound| bound.timestamp_millis());
    let mut removed = 0u64;
    for key in keys {
        let message_id = key.split("::").next().unwrap_or("");
        let entry_ms: Option<i64> = message_id.split('-').next().and_then(|s| s.parse().ok());

        let stale = match (entry_ms, bound_ms) {
            (Some(entry_ms), Some(bound_ms)) => entry_ms < bound_ms,
            (None, _) => false,
            (Some(_), None) => true,
        };

        if stale {
            store.delete(&key).await.or_bail("failed to delete progress key");
            removed += 1;
        }
    }

    tracing::info!(application = %args.application_name, removed, "cleaned handler progress records");
}
