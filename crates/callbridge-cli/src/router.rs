//! Command routing logic for CLI

use crate::args::{Cli, Commands};
use crate::commands;
use callbridge_core::config::Config;

/// Route CLI commands to their respective handlers
pub async fn route(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Ui { listen, spawn } => {
            let endpoint = match spawn {
                Some(command) => commands::ui::UiEndpoint::Spawn(command),
                None => commands::ui::UiEndpoint::Listen(
                    listen.unwrap_or_else(|| config.endpoint.address()),
                ),
            };
            commands::ui::run(&config, endpoint).await
        }
        Commands::Backend { connect, stdio } => {
            let endpoint = if stdio {
                commands::backend::BackendEndpoint::Stdio
            } else {
                commands::backend::BackendEndpoint::Connect(
                    connect.unwrap_or_else(|| config.endpoint.address()),
                )
            };
            commands::backend::run(&config, endpoint).await
        }
    }
}
