//! `setup`: gather basic facts about the host.
//!
//! Facts come from `uname` and `id` run over the task's connection and are
//! returned under `ansible_facts`. Gathering is read-only, so check mode
//! gathers as usual.

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::executor::{ExecutorResult, TaskResult};
use crate::traits::{ActionContext, ActionHandler};
use crate::vars::Vars;

const FACTS_COMMAND: &str = "uname -s; uname -n; uname -r; uname -m; id -un";

#[derive(Debug, Clone, Copy, Default)]
pub struct SetupAction;

/// Turn the facts command's output lines into facts.
pub fn parse_facts(stdout: &str) -> Map<String, JsonValue> {
    let mut lines = stdout.lines().map(str::trim);
    let mut facts = Map::new();
    let mut field = |key: &str, value: Option<&str>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            facts.insert(key.to_string(), json!(value));
        }
    };

    field("ansible_system", lines.next());
    let nodename = lines.next();
    field("ansible_nodename", nodename);
    field("ansible_hostname", nodename.and_then(|n| n.split('.').next()));
    field("ansible_fqdn", nodename);
    field("ansible_kernel", lines.next());
    field("ansible_architecture", lines.next());
    field("ansible_user_id", lines.next());
    facts
}

#[async_trait]
impl ActionHandler for SetupAction {
    fn name(&self) -> &str {
        "setup"
    }

    async fn run(&self, ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        let argv = ["/bin/sh".to_string(), "-c".to_string(), FACTS_COMMAND.to_string()];
        let out = ctx.exec(&argv, None).await?;
        if !out.success() {
            return Ok(TaskResult::failed(format!("fact gathering failed: {}", out.combined_output().trim()))
                .with("rc", json!(out.rc)));
        }

        let mut facts = parse_facts(&out.stdout);
        facts.insert("gather_subset".to_string(), json!(["min"]));
        debug!(host = %ctx.host.name, facts = facts.len(), "Gathered facts");
        Ok(TaskResult::ok().with("ansible_facts", JsonValue::Object(facts)))
    }
}
