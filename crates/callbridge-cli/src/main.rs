//! Callbridge CLI
//!
//! Runs either side of the bridge:
//!
//! ## UI
//! A terminal presenter. It exposes `DisplayMessage`, `ShowHood`, `senderText`
//! and `receiverText`, and submits each typed line to the backend's
//! `allCommand`. An empty line asks the backend to listen instead.
//!
//! - **Command:** `callbridge ui` or `callbridge ui --spawn callbridge backend --stdio`
//!
//! ## Backend
//! An echo assistant exposing `allCommand` and `takeCommand`. It answers by
//! calling back into the UI while the UI's call is still in flight.
//!
//! - **Command:** `callbridge backend` or `callbridge backend --stdio`
//!
//! Logs always go to stderr, so `--stdio` keeps stdout for frames.

mod args;
mod commands;
mod router;

use callbridge_core::config::{Config, LoggingConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config_file)?;

    // RUST_LOG wins over the configured level
    init_logging(&config.logging, cli.verbose);

    router::route(cli, config).await
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}
