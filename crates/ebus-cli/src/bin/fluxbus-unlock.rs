//! `fluxbus-unlock`: prompt-confirmed bulk removal of an application's
//! lock keys (`stream:group[:message_id]:LOCK`), per spec.md §6's
//! operational CLI tool list — a manual escape hatch for a lock left behind
//! by a crashed process that will never call `LockGuard::release`.

use std::io::Write;

use clap::Parser;
use fluxbus_cli_common::{init_logging, LogArgs, OrBail};
use fluxbus_config::Configuration;
use fluxbus_store::{RedisStreamStore, StreamStore};

#[derive(Debug, Parser)]
#[command(name = "fluxbus-unlock", about = "Remove an application's stale lock keys")]
struct Args {
    configuration_path: std::path::PathBuf,

    /// Only lock keys whose group name embeds this application name are considered.
    application_name: String,

    /// Skip the confirmation prompt.
    #[arg(long, short = 'y')]
    yes: bool,

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

    let pattern = format!("*:*{}*:*:LOCK", args.application_name);
    let keys = store.keys(&pattern).await.or_bail("failed to enumerate lock keys");

    if keys.is_empty() {
        tracing::info!(application = %args.application_name, "no lock keys found");
        return;
    }

    if !args.yes {
        print!("About to delete {} lock key(s) for '{}'. Continue? [y/N] ", keys.len(), args.application_name);
        std::io::stdout().flush().ok();
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer).ok();
        if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            tracing::info!("aborted, no keys removed");
            return;
        }
    }

    let mut removed = 0u64;
    for key in keys {
        store.delete(&key).await.or_bail("failed to delete lock key");
        removed += 1;
    }
    tracing::info!(application = %args.application_name, removed, "removed lock keys");
}
