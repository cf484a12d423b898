//! Subcommands module for Playengine CLI

pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::plugins::ModuleCatalog;

/// Common context shared between commands
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: Config,
    pub verbosity: u8,
    pub no_color: bool,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        Self {
            config,
            verbosity: cli.verbosity(),
            no_color: cli.no_color,
        }
    }

    /// Built-in actions plus modules found under the configured paths and
    /// any given on the command line.
    pub fn module_catalog(&self, extra: &[PathBuf]) -> ModuleCatalog {
        let mut paths: Vec<PathBuf> = extra.to_vec();
        paths.extend(self.config.defaults.module_paths.iter().cloned());
        ModuleCatalog::discover(&paths)
    }
}

/// Check that a playbook file exists before handing it to the loader.
pub(crate) fn require_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).with_context(|| format!("Playbook file not found: {}", path.display()))?;
    anyhow::ensure!(meta.is_file(), "Not a file: {}", path.display());
    Ok(())
}
