//! CLI module for Playengine
//!
//! Argument parsing and subcommand dispatch for the `playengine` binary.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::LogFormat;

/// Playengine - run playbooks against an inventory
#[derive(Parser, Debug, Clone)]
#[command(name = "playengine")]
#[command(author = "Playengine Contributors")]
#[command(version)]
#[command(about = "Run playbooks against an inventory", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, env = "PLAYENGINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format for diagnostics on stderr (text or json)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a playbook
    Run(commands::run::RunArgs),

    /// Load a playbook and report its structure without running it
    Validate(commands::validate::ValidateArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Default log filter for the verbosity level.
    pub fn log_level(&self) -> Option<&'static str> {
        match self.verbosity() {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "playengine", "run", "site.yml", "-i", "hosts.yml", "-f", "10", "-t", "web,db", "--skip-tags", "slow",
            "-e", "port=80", "-c", "local", "-vv", "--check",
        ])
        .unwrap();
        assert_eq!(cli.verbosity(), 2);
        assert_eq!(cli.log_level(), Some("debug"));

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.playbook, PathBuf::from("site.yml"));
        assert_eq!(args.inventory, Some(PathBuf::from("hosts.yml")));
        assert_eq!(args.forks, Some(10));
        assert_eq!(args.tags, vec!["web", "db"]);
        assert_eq!(args.skip_tags, vec!["slow"]);
        assert_eq!(args.extra_vars, vec!["port=80"]);
        assert_eq!(args.connection.as_deref(), Some("local"));
        assert!(args.check);
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::try_parse_from(["playengine", "--log-format", "json", "validate", "site.yml"]).unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.log_level(), None);
        assert!(Cli::try_parse_from(["playengine", "--log-format", "xml", "validate", "x"]).is_err());
    }
}
