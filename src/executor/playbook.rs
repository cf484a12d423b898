//! Playbook runner.
//!
//! Plays run one after another. Each play selects its hosts from the
//! inventory, then hands them to the [`TaskQueueManager`], which keeps the
//! failed and unreachable host sets across plays. A play whose batch lost
//! every host, or whose failure policy broke it, ends the run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::queue::{PlayPlan, QueueConfig, TaskQueueManager};
use super::stats::RunStats;
use super::{ExecutorServices, RunCode};
use crate::error::Result;
use crate::inventory::Inventory;
use crate::playbook::{PlayContext, Playbook, Resolve};
use crate::traits::{ExecutionCallback, NullCallback};

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookRun {
    pub code: RunCode,
    pub stats: RunStats,
}

impl PlaybookRun {
    pub fn success(&self) -> bool {
        self.code.is_ok()
    }
}

/// Runs every play of a playbook against an inventory.
pub struct PlaybookExecutor {
    inventory: Arc<dyn Inventory>,
    services: ExecutorServices,
    config: QueueConfig,
    context: PlayContext,
    callback: Arc<dyn ExecutionCallback>,
    cancel: CancellationToken,
}

impl PlaybookExecutor {
    pub fn new(inventory: Arc<dyn Inventory>, services: ExecutorServices) -> Self {
        Self {
            inventory,
            services,
            config: QueueConfig::default(),
            context: PlayContext::default(),
            callback: Arc::new(NullCallback),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_context(mut self, context: PlayContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn ExecutionCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Cancelling the token stops the run after in-flight tasks return.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn playbook_name(book: &Playbook) -> String {
        book.path()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "playbook".to_string())
    }

    /// Run the playbook. Load and host selection problems are errors;
    /// host failures are reported through the run code.
    #[instrument(skip(self, book), fields(plays = book.plays().len()))]
    pub async fn run(&self, book: Arc<Playbook>) -> Result<PlaybookRun> {
        let name = Self::playbook_name(&book);
        info!("Starting playbook: {}", name);
        self.callback.on_playbook_start(&name).await;

        let mut tqm = TaskQueueManager::new(self.config.clone(), self.services.clone(), Arc::clone(&self.callback))
            .with_cancellation(self.cancel.clone());
        let mut code = RunCode::Ok;

        for &play in book.plays() {
            let patterns = book.entity_ref(play).get_string_list("hosts");
            let hosts = self.inventory.select(&patterns)?;
            let plan = PlayPlan::new(Arc::clone(&book), play, hosts, &self.context);

            let names: Vec<String> = plan.hosts.iter().map(|h| h.name.clone()).collect();
            self.callback.on_play_start(&plan.name, &names).await;
            if names.is_empty() {
                warn!("Skipping play '{}': no hosts matched {:?}", plan.name, patterns);
                self.callback.on_play_end(&plan.name, true).await;
                continue;
            }

            let outcome = tqm.run_play(&plan).await?;
            self.callback.on_play_end(&plan.name, outcome.code.is_ok()).await;
            code = code.combine(outcome.code);
            if outcome.stop {
                info!("Stopping playbook after play '{}'", plan.name);
                break;
            }
        }

        self.callback.on_stats(tqm.stats()).await;
        self.callback.on_playbook_end(&name, code.is_ok()).await;
        info!("Playbook completed: {} ({})", name, code);

        Ok(PlaybookRun {
            code,
            stats: tqm.stats().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::StaticInventory;
    use crate::plugins::{ModuleCatalog, PluginRegistry};

    fn executor(names: &[&str]) -> PlaybookExecutor {
        let inventory = StaticInventory::from_names(names.iter().copied());
        let services = ExecutorServices::with_defaults(PluginRegistry::with_builtins());
        let context = PlayContext {
            connection: Some("local".into()),
            ..PlayContext::default()
        };
        PlaybookExecutor::new(Arc::new(inventory), services).with_context(context)
    }

    fn book(yaml: &str) -> Arc<Playbook> {
        Arc::new(Playbook::from_yaml_str(yaml, &ModuleCatalog::builtin()).unwrap())
    }

    #[tokio::test]
    async fn test_failed_host_skips_later_plays() {
        let yaml = r#"
- hosts: all
  gather_facts: no
  tasks:
    - fail:
      when: inventory_hostname == 'a'
- hosts: all
  gather_facts: no
  tasks:
    - debug:
"#;
        let run = executor(&["a", "b"]).run(book(yaml)).await.unwrap();
        assert_eq!(run.code, RunCode::FailedHosts);
        assert_eq!(run.stats.get("a").unwrap().failed, 1);
        assert_eq!(run.stats.get("a").unwrap().ok, 0);
        assert_eq!(run.stats.get("b").unwrap().ok, 1);
        assert_eq!(run.stats.get("b").unwrap().skipped, 1);
    }

    #[tokio::test]
    async fn test_play_without_hosts_is_skipped() {
        let yaml = "- hosts: nothing\n  tasks:\n    - debug:\n- hosts: all\n  gather_facts: no\n  tasks:\n    - debug:\n";
        let run = executor(&["a"]).run(book(yaml)).await.unwrap();
        assert!(run.success());
        assert_eq!(run.stats.get("a").unwrap().ok, 1);
    }

    #[tokio::test]
    async fn test_bad_pattern_is_an_error() {
        let yaml = "- hosts: '~['\n  tasks: []\n";
        assert!(executor(&["a"]).run(book(yaml)).await.is_err());
    }
}
