//! `fluxbus-schema`: emit the configuration document's JSON Schema, per
//! spec.md §6's `generate-schema`/`schema` CLI surface.

use std::path::PathBuf;

use clap::Parser;
use fluxbus_cli_common::{init_logging, LogArgs, OrBail};

#[derive(Debug, Parser)]
#[command(name = "fluxbus-schema", about = "Write the configuration document's JSON Schema")]
struct Args {
    /// Write the schema to this file instead of stdout.
    #[arg(short = 'p', long = "path")]
    path: Option<PathBuf>,

    /// Write to stdout with no trailing newline, for piping into another tool.
    #[arg(long)]
    pipe: bool,

    #[command(flatten)]
    log: LogArgs,
}

fn main() {
    let args = Args::parse();
    init_logging(&args.log);

    let schema = fluxbus_config::schema();
    let text = serde_json::to_string_pretty(&schema).or_bail("failed to render JSON Schema");

    match args.path {
        Some(path) => {
            std::fs::write(&path, text).or_bail("failed to write schema file");
            tracing::info!(path = %path.display(), "wrote configuration schema");
        }
        None if args.pipe => print!("{text}"),
        None => println!("{text}"),
    }
}
