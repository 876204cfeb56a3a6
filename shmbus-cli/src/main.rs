// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shmbus CLI
//!
//! Command-line interface for the shmbus shared memory bus.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Shmbus - Shared memory message passing with service discovery
#[derive(Parser)]
#[command(name = "shmbus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = shmbus_core::config::DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the discovery daemon
    Daemon {
        /// Override the daemon socket path
        #[arg(short, long)]
        socket: Option<String>,
    },

    /// Create a ring, register it and write messages into it
    Produce {
        /// Service key to register under
        #[arg(short, long)]
        service: String,

        /// Number of messages to write
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u64,

        /// Delay between messages in milliseconds
        #[arg(short, long, default_value_t = 500)]
        interval_ms: u64,

        /// Override the configured slot count
        #[arg(long)]
        slots: Option<u32>,

        /// Override the configured slot size in bytes
        #[arg(long)]
        slot_size: Option<u32>,
    },

    /// Register for a service and read from the rings of discovered peers
    Consume {
        /// Service key to register under
        #[arg(short, long)]
        service: String,

        /// Stop after this many messages
        #[arg(short, long)]
        max: Option<u64>,
    },

    /// Print the header and semaphore counts of an existing ring
    Inspect {
        /// Shared memory name, e.g. /shmbus_demo_1234
        shm_name: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging, RUST_LOG takes precedence
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Daemon { socket } => commands::daemon::execute(&cli.config, socket).await,
        Commands::Produce {
            service,
            count,
            interval_ms,
            slots,
            slot_size,
        } => {
            let options = commands::produce::ProduceOptions {
                service,
                count,
                interval_ms,
                slots,
                slot_size,
            };
            commands::produce::execute(&cli.config, options).await
        }
        Commands::Consume { service, max } => {
            commands::consume::execute(&cli.config, &service, max).await
        }
        Commands::Inspect { shm_name } => commands::inspect::execute(&shm_name).await,
        Commands::Validate { file } => commands::validate::execute(&file).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_produce_defaults() {
        let cli = Cli::parse_from(["shmbus", "produce", "--service", "demo"]);
        assert_eq!(cli.config, "shmbus.yaml");
        match cli.command {
            Commands::Produce {
                service,
                count,
                slots,
                slot_size,
                ..
            } => {
                assert_eq!(service, "demo");
                assert_eq!(count, 10);
                assert!(slots.is_none() && slot_size.is_none());
            }
            _ => panic!("expected produce"),
        }
    }

    #[test]
    fn test_consume_max() {
        let cli = Cli::parse_from(["shmbus", "-v", "consume", "-s", "demo", "--max", "3"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Consume { max: Some(3), .. }
        ));
    }
}
