//! Run command - Execute a playbook

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{require_file, CommandContext};
use crate::callback::{CallbackSet, DefaultCallback, LoggingCallback};
use crate::executor::{ExecutorServices, PlaybookExecutor};
use crate::inventory::{Inventory, StaticInventory};
use crate::playbook::{PlayContext, Playbook};
use crate::plugins::{ActionCache, PluginRegistry};
use crate::template::JinjaEvaluator;
use crate::vars::{merge_vars, parse_extra_var, vars_from_json, yaml_to_json, Vars};

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the playbook file
    #[arg(required = true)]
    pub playbook: PathBuf,

    /// Path to inventory file
    #[arg(short = 'i', long, env = "PLAYENGINE_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short = 'f', long)]
    pub forks: Option<usize>,

    /// Only run tasks with these tags
    #[arg(long, short = 't', value_delimiter = ',', action = clap::ArgAction::Append)]
    pub tags: Vec<String>,

    /// Skip tasks with these tags
    #[arg(long, value_delimiter = ',', action = clap::ArgAction::Append)]
    pub skip_tags: Vec<String>,

    /// Extra variables (key=value or @file.yml)
    #[arg(short = 'e', long = "extra-vars", action = clap::ArgAction::Append)]
    pub extra_vars: Vec<String>,

    /// Connection type to use for every host
    #[arg(short = 'c', long)]
    pub connection: Option<String>,

    /// Remote user
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Report what would change without changing it
    #[arg(long)]
    pub check: bool,

    /// Show differences where actions support it
    #[arg(long)]
    pub diff: bool,

    /// Start at the first task matching this name or glob
    #[arg(long)]
    pub start_at_task: Option<String>,

    /// Run notified handlers even on failed hosts
    #[arg(long)]
    pub force_handlers: bool,

    /// Per-task timeout in seconds, 0 for none
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Extra directories to search for modules
    #[arg(short = 'M', long = "module-path", action = clap::ArgAction::Append)]
    pub module_path: Vec<PathBuf>,
}

impl RunArgs {
    /// Execute the run command and return the process exit code.
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        require_file(&self.playbook)?;

        let catalog = ctx.module_catalog(&self.module_path);
        let book = match Playbook::load(&self.playbook, &catalog) {
            Ok(book) => Arc::new(book),
            Err(e) => {
                error!(playbook = %self.playbook.display(), error = %e, "Failed to load playbook");
                eprintln!("ERROR! {}", e);
                return Ok(e.exit_code());
            }
        };

        let inventory = match self.load_inventory(ctx) {
            Ok(inventory) => inventory,
            Err(e) => {
                eprintln!("ERROR! {}", e);
                return Ok(e.exit_code());
            }
        };

        let context = self.play_context(ctx)?;
        let mut queue = ctx.config.queue_config();
        if let Some(forks) = self.forks {
            queue = queue.with_forks(forks);
        }
        if let Some(timeout) = self.timeout {
            queue = queue.with_task_timeout((timeout > 0).then_some(std::time::Duration::from_secs(timeout)));
        }

        let services = ExecutorServices::new(
            Arc::new(PluginRegistry::with_catalog(catalog)),
            Arc::new(JinjaEvaluator::new()),
            Arc::new(ActionCache::new()),
        );
        let callback = CallbackSet::new()
            .with(Arc::new(
                DefaultCallback::new()
                    .with_verbosity(ctx.verbosity)
                    .with_no_color(ctx.no_color),
            ))
            .with(Arc::new(LoggingCallback::new()));

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after running tasks");
                interrupt.cancel();
            }
        });

        info!(playbook = %self.playbook.display(), forks = queue.forks, "Running playbook");
        let executor = PlaybookExecutor::new(inventory, services)
            .with_config(queue)
            .with_context(context)
            .with_callback(Arc::new(callback))
            .with_cancellation(cancel);

        match executor.run(book).await {
            Ok(run) => Ok(run.code.exit_code()),
            Err(e) => {
                eprintln!("ERROR! {}", e);
                Ok(e.exit_code())
            }
        }
    }

    fn load_inventory(&self, ctx: &CommandContext) -> crate::error::Result<Arc<dyn Inventory>> {
        let path = self.inventory.as_ref().or(ctx.config.defaults.inventory.as_ref());
        match path {
            Some(path) => Ok(Arc::new(StaticInventory::load(path)?)),
            None => {
                warn!("No inventory specified, only localhost is available");
                Ok(Arc::new(StaticInventory::new()))
            }
        }
    }

    /// Command-line settings layered over the configuration defaults.
    pub fn play_context(&self, ctx: &CommandContext) -> Result<PlayContext> {
        Ok(PlayContext {
            connection: self.connection.clone().or_else(|| ctx.config.forced_transport()),
            remote_user: self.user.clone().or_else(|| ctx.config.defaults.remote_user.clone()),
            port: ctx.config.defaults.port,
            only_tags: self.tags.clone(),
            skip_tags: self.skip_tags.clone(),
            start_at_task: self.start_at_task.clone(),
            check_mode: self.check,
            diff: self.diff,
            force_handlers: self.force_handlers,
            extra_vars: parse_extra_vars(&self.extra_vars)?,
        })
    }
}

/// Parse `-e` values in order; later values win.
pub fn parse_extra_vars(raw: &[String]) -> Result<Vars> {
    let mut vars = Vars::new();
    for item in raw {
        if let Some(path) = item.strip_prefix('@') {
            merge_vars(&mut vars, &load_vars_file(Path::new(path))?);
        } else if item.trim_start().starts_with('{') {
            let value: serde_json::Value =
                serde_json::from_str(item).with_context(|| format!("Invalid JSON extra vars: {}", item))?;
            merge_vars(&mut vars, &vars_from_json(&value));
        } else {
            for pair in shell_words::split(item).with_context(|| format!("Invalid extra vars: {}", item))? {
                let Some((key, value)) = parse_extra_var(&pair) else {
                    bail!("Extra vars must be key=value, @file or JSON: {}", pair);
                };
                vars.insert(key, value);
            }
        }
    }
    Ok(vars)
}

fn load_vars_file(path: &Path) -> Result<Vars> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read vars file: {}", path.display()))?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse vars file: {}", path.display()))?;
    Ok(vars_from_json(&yaml_to_json(&yaml)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extra_vars_forms() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vars.yml");
        std::fs::write(&file, "region: eu\nport: 22\n").unwrap();

        let raw = vec![
            "port=80 name='web one'".to_string(),
            format!("@{}", file.display()),
            r#"{"debug": true}"#.to_string(),
        ];
        let vars = parse_extra_vars(&raw).unwrap();
        assert_eq!(vars["name"], json!("web one"));
        assert_eq!(vars["port"], json!(22));
        assert_eq!(vars["region"], json!("eu"));
        assert_eq!(vars["debug"], json!(true));

        assert!(parse_extra_vars(&["novalue".to_string()]).is_err());
    }
}
