//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// kron - CronJob controller
#[derive(Parser, Debug)]
#[command(name = "kron")]
#[command(version)]
#[command(about = "Level-triggered controller that keeps one Job per CronJob")]
#[command(
    long_about = "kron loads CronJob manifests into an in-memory object store and reconciles each one into a Job, re-creating the Job on the CronJob's schedule until interrupted."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until SIGINT or SIGTERM
    Run {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// CronJob manifests (multi-document YAML)
        #[arg(short, long)]
        manifests: Vec<PathBuf>,

        /// Worker count (overrides config and environment)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Validate configuration and print the effective settings
    CheckConfig {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "kron", "run", "-m", "a.yaml", "-m", "b.yaml", "--workers", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                config,
                manifests,
                workers,
            } => {
                assert!(config.is_none());
                assert_eq!(manifests.len(), 2);
                assert_eq!(workers, Some(3));
            }
            Commands::CheckConfig { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_check_config_args() {
        let cli = Cli::try_parse_from(["kron", "check-config", "--config", "kron.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::CheckConfig { config: Some(_) }));
    }
}
