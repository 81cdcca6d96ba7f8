//! `fluxbus-clear-groups`: sweep idle consumers and empty consumer groups
//! off every stream in the keyspace, per spec.md §6's operational CLI tool
//! list — the routine housekeeping counterpart to the one-shot `purge`
//! master-stream command.
//!
//! Grounded on `original_source/.../event_stream/cli/clear_groups.py`,
//! which discovers every stream via `connection.keys("*")` filtered by
//! `connection.type(key) == STREAM_TYPE` rather than operating on a single
//! named stream — spec.md §6 names no `--stream` argument for this tool
//! either, so this binary sweeps the whole keyspace the same way.

use std::path::PathBuf;

use clap::Parser;
use fluxbus_cli_common::{init_logging, LogArgs, OrBail};
use fluxbus_config::Configuration;
use fluxbus_store::{KeyType, RedisStreamStore, StreamStore};

#[derive(Debug, Parser)]
#[command(name = "fluxbus-clear-groups", about = "Remove idle consumers and empty consumer groups from every stream")]
struct Args {
    configuration_path: PathBuf,

    /// Only remove consumers that have been idle since before this RFC3339
    /// timestamp; omit to ignore age entirely and rely on `--ignore-pending`.
    #[arg(long = "oldest-allowed")]
    oldest_allowed: Option<chrono::DateTime<chrono::Utc>>,

    #[arg(long = "inbox-name", default_value = "inbox")]
    inbox_name: String,

    /// Remove groups/consumers even if they still have pending entries.
    #[arg(long = "ignore-pending")]
    ignore_pending: bool,

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

    let min_idle_ms = args.oldest_allowed.map(|bound| {
        let age = chrono::Utc::now().signed_duration_since(bound);
        age.num_milliseconds().max(0) as u64
    });

    let keys = store.keys("*").await.or_bail("failed to enumerate the keyspace");
    let mut streams = Vec::new();
    for key in keys {
        match store.type_of(&key).await.or_bail("failed to read key type") {
            Some(KeyType::Stream) => streams.push(key),
            _ => continue,
        }
    }

    if streams.is_empty() {
        tracing::info!("no streams found in the keyspace");
        return;
    }

    for stream in streams {
        sweep_stream(&store, &stream, &args, min_idle_ms).await;
    }
}

async fn sweep_stream(store: &RedisStreamStore, stream: &str, args: &Args, min_idle_ms: Option<u64>) {
    let groups = store.info_groups(stream).await.or_bail("failed to list consumer groups");
    for group in groups {
        let consumers = store
            .info_consumers(stream, &group.name)
            .await
            .or_bail("failed to list consumers");
        let mut remaining = consumers.len();

        for consumer in &consumers {
            if consumer.name == args.inbox_name {
                continue;
            }
            let pending_ok = args.ignore_pending || consumer.pending == 0;
            let age_ok = min_idle_ms.map_or(true, |bound| consumer.idle_ms >= bound);
            if pending_ok && age_ok {
                store
                    .group_del_consumer(stream, &group.name, &consumer.name)
                    .await
                    .or_bail("failed to remove consumer");
                tracing::info!(stream, group = %group.name, consumer = %consumer.name, "removed idle consumer");
                remaining -= 1;
            }
        }

        let summary = store
            .pending_summary(stream, &group.name)
            .await
            .or_bail("failed to read pending summary");
        if remaining <= 1 && (args.ignore_pending || summary.count == 0) {
            store.group_destroy(stream, &group.name).await.or_bail("failed to destroy group");
            tracing::info!(stream, group = %group.name, "destroyed empty consumer group");
        }
    }
}
