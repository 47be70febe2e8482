//! CLI argument definitions using clap
//!
//! - callbridge ui                       # Wait for a backend on the configured endpoint
//! - callbridge ui --spawn CMD ARGS...   # Run the backend as a child over stdio
//! - callbridge backend                  # Connect to a waiting UI
//! - callbridge backend --stdio          # Serve a parent UI over stdin/stdout

use callbridge_core::config::DEFAULT_CONFIG_FILE;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "callbridge")]
#[command(about = "Callbridge - call functions across the assistant backend and its UI")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the terminal UI: renders what the backend sends and submits typed lines
    Ui {
        /// Address to wait for the backend on (defaults to the configured endpoint)
        #[arg(long, conflicts_with = "spawn")]
        listen: Option<String>,

        /// Spawn the backend and talk to it over its stdin/stdout
        #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "COMMAND")]
        spawn: Option<Vec<String>>,
    },

    /// Run the echo backend
    Backend {
        /// Address of the waiting UI (defaults to the configured endpoint)
        #[arg(long, conflicts_with = "stdio")]
        connect: Option<String>,

        /// Talk to the UI over stdin/stdout
        #[arg(long)]
        stdio: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_takes_trailing_arguments() {
        let cli = Cli::parse_from([
            "callbridge",
            "ui",
            "--spawn",
            "callbridge",
            "backend",
            "--stdio",
        ]);
        match cli.command {
            Commands::Ui { listen, spawn } => {
                assert_eq!(listen, None);
                assert_eq!(
                    spawn,
                    Some(vec![
                        "callbridge".to_string(),
                        "backend".to_string(),
                        "--stdio".to_string()
                    ])
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.config_file, DEFAULT_CONFIG_FILE);
    }

    #[test]
    fn test_connect_conflicts_with_stdio() {
        let result =
            Cli::try_parse_from(["callbridge", "backend", "--connect", "127.0.0.1:1", "--stdio"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["callbridge", "backend", "-v", "--config-file", "alt.json"]);
        assert!(cli.verbose);
        assert_eq!(cli.config_file, "alt.json");
    }
}
