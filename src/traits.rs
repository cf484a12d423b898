//! Core traits at the seams of the execution engine.
//!
//! The engine itself never evaluates expressions, runs modules or prints
//! anything. It consumes these interfaces:
//!
//! - [`ConditionalEvaluator`]: `when`, `until`, `changed_when` and
//!   `failed_when` lists, and argument templating
//! - [`ActionHandler`]: one attempt of one task on one host
//! - [`ExecutionCallback`]: progress events for output and reporting
//!
//! Transports live in [`crate::connection`] and inventories in
//! [`crate::inventory`].

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::connection::{become_command, CommandResult, ConnectionHandler};
use crate::executor::{ExecutorResult, RunStats, TaskResult, TaskSpec};
use crate::inventory::Host;
use crate::playbook::attribute::json_to_plain_string;
use crate::playbook::PlayContext;
use crate::plugins::{ActionCache, ModuleCatalog};
use crate::vars::Vars;

// ============================================================================
// Conditionals
// ============================================================================

/// Evaluates boolean expressions and templates against a variable scope.
pub trait ConditionalEvaluator: Send + Sync {
    /// AND a list of expressions. An empty list is true.
    fn evaluate(&self, expressions: &[String], vars: &Vars) -> ExecutorResult<bool>;

    /// Render templates found in a value. The default leaves it untouched.
    fn render(&self, value: &JsonValue, vars: &Vars) -> ExecutorResult<JsonValue> {
        let _ = vars;
        Ok(value.clone())
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Everything an action needs for one attempt.
pub struct ActionContext<'a> {
    pub task: &'a TaskSpec,
    /// Task arguments with templates rendered
    pub args: &'a IndexMap<String, JsonValue>,
    pub host: &'a Host,
    pub connection: &'a dyn ConnectionHandler,
    pub cache: &'a ActionCache,
    pub catalog: &'a ModuleCatalog,
    pub play_context: &'a PlayContext,
    pub evaluator: &'a dyn ConditionalEvaluator,
}

impl<'a> ActionContext<'a> {
    /// Whether the task runs in check mode.
    pub fn check_mode(&self) -> bool {
        self.task.check_mode.unwrap_or(self.play_context.check_mode)
    }

    pub fn arg(&self, key: &str) -> Option<&JsonValue> {
        self.args.get(key)
    }

    /// An argument rendered as plain text.
    pub fn arg_str(&self, key: &str) -> Option<String> {
        self.args.get(key).map(json_to_plain_string)
    }

    /// Wrap a command for the task's environment and privilege settings.
    pub fn command_line(&self, argv: &[String]) -> Vec<String> {
        let mut cmd = Vec::with_capacity(argv.len());
        if !self.task.environment.is_empty() {
            cmd.push("env".to_string());
            cmd.extend(
                self.task
                    .environment
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, json_to_plain_string(v))),
            );
        }
        cmd.extend(argv.iter().cloned());

        if self.task.become_ {
            become_command(
                &cmd,
                &self.task.become_method,
                self.task.become_user.as_deref(),
                self.task.become_flags.as_deref(),
            )
        } else {
            cmd
        }
    }

    /// Run a command on the host through the task's connection.
    pub async fn exec(&self, argv: &[String], stdin: Option<&str>) -> ExecutorResult<CommandResult> {
        let cmd = self.command_line(argv);
        Ok(self.connection.execute(&cmd, stdin).await?)
    }
}

/// Runs one attempt of a task.
///
/// The returned map is open: handlers add whatever keys they like. The
/// engine interprets `changed`, `failed`, `rc`, `skipped`, `msg` and
/// `ansible_facts`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Action name this handler is registered under.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &ActionContext<'_>, vars: &Vars) -> ExecutorResult<TaskResult>;
}

// ============================================================================
// Callbacks
// ============================================================================

/// Receives progress events. Every method defaults to doing nothing.
#[async_trait]
pub trait ExecutionCallback: Send + Sync {
    /// Called when a playbook starts.
    async fn on_playbook_start(&self, name: &str) {
        let _ = name;
    }

    /// Called when a playbook ends.
    async fn on_playbook_end(&self, name: &str, success: bool) {
        let _ = (name, success);
    }

    /// Called when a play starts.
    async fn on_play_start(&self, name: &str, hosts: &[String]) {
        let _ = (name, hosts);
    }

    /// Called when a play ends.
    async fn on_play_end(&self, name: &str, success: bool) {
        let _ = (name, success);
    }

    /// Called when a task is dispatched to a host.
    async fn on_task_start(&self, name: &str, host: &str) {
        let _ = (name, host);
    }

    /// Called with the final result of a task on a host.
    async fn on_task_result(&self, host: &str, task: &TaskSpec, result: &TaskResult) {
        let _ = (host, task, result);
    }

    /// Called when a handler is queued for a host.
    async fn on_handler_triggered(&self, host: &str, name: &str) {
        let _ = (host, name);
    }

    /// Called once with the statistics of the whole run.
    async fn on_stats(&self, stats: &RunStats) {
        let _ = stats;
    }
}

/// A callback that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCallback;

impl ExecutionCallback for NullCallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use serde_json::json;

    struct AlwaysTrue;

    impl ConditionalEvaluator for AlwaysTrue {
        fn evaluate(&self, _: &[String], _: &Vars) -> ExecutorResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_command_line_wraps_env_and_become() {
        let mut task = TaskSpec::new("t", "command");
        task.environment.insert("LANG".into(), json!("C"));
        task.become_ = true;
        task.become_user = Some("app".into());

        let args = IndexMap::new();
        let host = Host::new("web1");
        let conn = LocalConnection::new();
        let cache = ActionCache::new();
        let catalog = ModuleCatalog::builtin();
        let play_context = PlayContext::new();
        let ctx = ActionContext {
            task: &task,
            args: &args,
            host: &host,
            connection: &conn,
            cache: &cache,
            catalog: &catalog,
            play_context: &play_context,
            evaluator: &AlwaysTrue,
        };

        let line = ctx.command_line(&["id".to_string()]);
        assert_eq!(
            line,
            vec!["sudo", "-H", "-n", "-u", "app", "--", "env", "LANG=C", "id"]
        );
        assert!(!ctx.check_mode());
    }

    #[test]
    fn test_default_render_is_identity() {
        let value = json!({"a": "{{ x }}"});
        assert_eq!(AlwaysTrue.render(&value, &Vars::new()).unwrap(), value);
    }
}
