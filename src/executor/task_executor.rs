//! Runs one task on one host.
//!
//! [`TaskExecutor::run`] evaluates `when`, opens a connection, renders the
//! arguments and calls the action handler, retrying while an `until`
//! condition does not hold. Loops run the whole sequence once per item.
//! Errors never escape: they become failed or unreachable results.

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};

use super::task::{TaskResult, TaskSpec, NOTIFY_KEY};
use super::{ExecutorError, ExecutorResult, ExecutorServices};
use crate::connection::ConnectionHandler;
use crate::inventory::Host;
use crate::playbook::PlayContext;
use crate::plugins::ConnectionTarget;
use crate::traits::{ActionContext, ActionHandler};
use crate::vars::Vars;

/// Default wait between `until` attempts, in seconds.
const DEFAULT_DELAY: u64 = 1;

fn is_local_address(addr: &str) -> bool {
    matches!(addr, "localhost" | "127.0.0.1" | "::1")
}

/// Executes a single task against a single host.
pub struct TaskExecutor<'a> {
    services: &'a ExecutorServices,
    host: &'a Host,
    task: &'a TaskSpec,
    play_context: &'a PlayContext,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(
        services: &'a ExecutorServices,
        host: &'a Host,
        task: &'a TaskSpec,
        play_context: &'a PlayContext,
    ) -> Self {
        Self {
            services,
            host,
            task,
            play_context,
        }
    }

    /// Run the task. `vars` is the host's variable scope; a `register`ed
    /// result is bound into it.
    #[instrument(skip(self, vars), fields(host = %self.host.name, task = %self.task.name, action = %self.task.action))]
    pub async fn run(&self, vars: &mut Vars) -> TaskResult {
        let mut connection: Option<Box<dyn ConnectionHandler>> = None;

        let mut result = match self.loop_items(vars) {
            Ok(Some(items)) => self.run_loop(items, vars, &mut connection).await,
            Ok(None) => self.execute(vars, &mut connection).await,
            Err(e) => Self::error_result(e),
        };

        if let Some(mut conn) = connection {
            if let Err(e) = conn.close().await {
                debug!(host = %self.host.name, error = %e, "Error closing connection");
            }
        }

        if !self.task.notify.is_empty() {
            result.insert(NOTIFY_KEY, json!(self.task.notify));
        }
        result
    }

    /// The rendered `loop` value, if the task has one.
    fn loop_items(&self, vars: &Vars) -> ExecutorResult<Option<Vec<JsonValue>>> {
        let Some(raw) = &self.task.loop_items else {
            return Ok(None);
        };
        match self.services.evaluator.render(raw, vars)? {
            JsonValue::Array(items) => Ok(Some(items)),
            JsonValue::Null => Ok(None),
            other => Err(ExecutorError::RuntimeError(format!(
                "Invalid data passed to 'loop', it requires a list, got this instead: {}",
                other
            ))),
        }
    }

    async fn run_loop(
        &self,
        items: Vec<JsonValue>,
        vars: &mut Vars,
        connection: &mut Option<Box<dyn ConnectionHandler>>,
    ) -> TaskResult {
        if items.is_empty() {
            return TaskResult::skipped("No items in the list").with("results", json!([]));
        }

        let saved_item = vars.get("item").cloned();
        let saved_loop = vars.get("ansible_loop").cloned();
        let length = items.len();
        let mut results = Vec::with_capacity(length);
        let mut facts = Map::new();
        let (mut changed, mut failed, mut all_skipped) = (false, false, true);

        for (index, item) in items.into_iter().enumerate() {
            vars.insert("item".to_string(), item.clone());
            vars.insert(
                "ansible_loop".to_string(),
                json!({
                    "index": index + 1,
                    "index0": index,
                    "first": index == 0,
                    "last": index + 1 == length,
                    "length": length,
                }),
            );

            let mut item_result = self.execute(vars, connection).await;
            if item_result.is_unreachable() {
                restore(vars, "item", saved_item);
                restore(vars, "ansible_loop", saved_loop);
                return item_result;
            }

            changed |= item_result.is_changed();
            failed |= item_result.is_failed();
            all_skipped &= item_result.is_skipped();
            if let Some(item_facts) = item_result.facts() {
                facts.extend(item_facts.clone());
            }
            item_result.insert("item", item);
            item_result.insert("ansible_loop_var", json!("item"));
            results.push(item_result.to_json());
        }

        restore(vars, "item", saved_item);
        restore(vars, "ansible_loop", saved_loop);

        let mut result = TaskResult::new()
            .with("changed", json!(changed))
            .with("results", JsonValue::Array(results));
        if failed {
            result.insert("failed", json!(true));
            result.insert("msg", json!("One or more items failed"));
        } else {
            result.insert("failed", json!(false));
            result.insert("msg", json!("All items completed"));
        }
        if all_skipped {
            result.insert("skipped", json!(true));
        }
        if !facts.is_empty() {
            result.insert("ansible_facts", JsonValue::Object(facts));
        }
        self.register(vars, &result);
        result
    }

    /// One pass of the task: condition, connection, action and retries.
    async fn execute(&self, vars: &mut Vars, connection: &mut Option<Box<dyn ConnectionHandler>>) -> TaskResult {
        match self.services.evaluator.evaluate(&self.task.when, vars) {
            Ok(true) => {}
            Ok(false) => {
                debug!(host = %self.host.name, task = %self.task.name, "Conditional result was False");
                return TaskResult::skipped("Conditional result was False")
                    .with("false_condition", json!(self.task.when));
            }
            Err(e) => return Self::error_result(e),
        }

        if connection.is_none() {
            match self.open_connection().await {
                Ok(conn) => *connection = Some(conn),
                Err(e) => {
                    warn!(host = %self.host.name, error = %e, "Host unreachable");
                    return TaskResult::unreachable(e.to_string());
                }
            }
        }
        let Some(conn) = connection.as_deref() else {
            return TaskResult::unreachable("connection is not open");
        };

        let handler = match self.action_handler() {
            Ok(handler) => handler,
            Err(e) => return Self::error_result(e),
        };
        let args = match self.render_args(vars) {
            Ok(args) => args,
            Err(e) => return Self::error_result(e),
        };

        let ctx = ActionContext {
            task: self.task,
            args: &args,
            host: self.host,
            connection: conn,
            cache: &self.services.cache,
            catalog: self.services.plugins.catalog(),
            play_context: self.play_context,
            evaluator: self.services.evaluator.as_ref(),
        };

        let retries = self.retries();
        let delay = self.delay();
        let mut result = TaskResult::new();

        for attempt in 1..=retries {
            result = match handler.run(&ctx, vars).await {
                Ok(result) => result,
                Err(e) if e.is_unreachable() => return TaskResult::unreachable(e.to_string()),
                Err(e) => Self::error_result(e),
            };

            normalize(&mut result);
            self.register(vars, &result);
            if let Err(e) = self.apply_overrides(&mut result, vars) {
                return Self::error_result(e);
            }
            self.register(vars, &result);

            if self.task.until.is_empty() {
                break;
            }
            result.insert("attempts", json!(attempt));
            match self.services.evaluator.evaluate(&self.task.until, vars) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => return Self::error_result(e),
            }

            if attempt == retries {
                result.insert("failed", json!(true));
                self.register(vars, &result);
            } else {
                info!(
                    host = %self.host.name,
                    task = %self.task.name,
                    retries_left = retries - attempt,
                    "FAILED - RETRYING"
                );
                if delay > 0 {
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
            }
        }

        result
    }

    /// Attempts to make: one, or `retries + 1` when `until` is set.
    fn retries(&self) -> i64 {
        if self.task.until.is_empty() {
            return 1;
        }
        match self.task.retries.unwrap_or(3) {
            r if r < 0 => 1,
            r => r + 1,
        }
    }

    /// Seconds between attempts. Unset or negative means the default.
    fn delay(&self) -> u64 {
        match self.task.delay {
            Some(d) if d >= 0 => d as u64,
            _ => DEFAULT_DELAY,
        }
    }

    fn register(&self, vars: &mut Vars, result: &TaskResult) {
        if let Some(name) = &self.task.register {
            vars.insert(name.clone(), result.to_json());
        }
    }

    fn apply_overrides(&self, result: &mut TaskResult, vars: &Vars) -> ExecutorResult<()> {
        let evaluator = &self.services.evaluator;
        if !self.task.changed_when.is_empty() {
            let changed = evaluator.evaluate(&self.task.changed_when, vars)?;
            result.insert("changed", json!(changed));
        }
        if !self.task.failed_when.is_empty() {
            let failed = evaluator.evaluate(&self.task.failed_when, vars)?;
            result.insert("failed", json!(failed));
            result.insert("failed_when_result", json!(failed));
        }
        Ok(())
    }

    fn action_handler(&self) -> ExecutorResult<std::sync::Arc<dyn ActionHandler>> {
        let plugins = &self.services.plugins;
        plugins
            .action(&self.task.action)
            .or_else(|| plugins.action("normal"))
            .ok_or_else(|| ExecutorError::ActionNotFound(self.task.action.clone()))
    }

    fn render_args(&self, vars: &Vars) -> ExecutorResult<IndexMap<String, JsonValue>> {
        let mut rendered = IndexMap::with_capacity(self.task.args.len());
        for (key, value) in &self.task.args {
            rendered.insert(key.clone(), self.services.evaluator.render(value, vars)?);
        }
        Ok(rendered)
    }

    /// Address and connection type, honouring `delegate_to`.
    fn target(&self) -> (String, bool) {
        match &self.task.delegate_to {
            Some(delegate) => (delegate.clone(), is_local_address(delegate)),
            None => (self.host.address().to_string(), self.host.is_localhost()),
        }
    }

    /// Connection type: inventory, then the transport forced on the command
    /// line, then the task's own (inherited from its block and play).
    /// `smart` picks `local` for the control node and `ssh` otherwise.
    pub fn connection_type(&self) -> String {
        let (_, local) = self.target();
        let inventory = if self.task.delegate_to.is_some() {
            None
        } else {
            self.host.connection()
        };
        let name = inventory
            .or(self.play_context.connection.as_deref())
            .or(self.task.connection.as_deref())
            .unwrap_or("smart");
        match name {
            "smart" if local => "local".to_string(),
            "smart" => "ssh".to_string(),
            other => other.to_string(),
        }
    }

    fn connection_target(&self) -> ConnectionTarget {
        let (address, _) = self.target();
        let host_var = |key: &str| {
            if self.task.delegate_to.is_some() {
                None
            } else {
                self.host.vars.get(key)
            }
        };

        let mut target = ConnectionTarget::new(address);
        target.port = host_var("ansible_port")
            .and_then(JsonValue::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .or(self.task.port)
            .or(self.play_context.port);
        target.user = host_var("ansible_user")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .or_else(|| self.task.remote_user.clone())
            .or_else(|| self.play_context.remote_user.clone());
        target
    }

    async fn open_connection(&self) -> ExecutorResult<Box<dyn ConnectionHandler>> {
        let name = self.connection_type();
        let target = self.connection_target();
        debug!(host = %self.host.name, connection = %name, address = %target.host, "Opening connection");
        let mut conn = self.services.plugins.connection(&name, &target)?;
        conn.connect().await?;
        Ok(conn)
    }

    fn error_result(err: ExecutorError) -> TaskResult {
        if err.is_unreachable() {
            TaskResult::unreachable(err.to_string())
        } else {
            TaskResult::failed(err.to_string())
        }
    }
}

/// Fill in `failed` from `rc` and default `changed` to false.
fn normalize(result: &mut TaskResult) {
    if !result.contains_key("failed") {
        let failed = match result.get("rc") {
            None | Some(JsonValue::Null) => false,
            Some(JsonValue::Number(n)) => n.as_f64() != Some(0.0),
            Some(JsonValue::String(s)) => s.trim() != "0",
            Some(_) => true,
        };
        result.insert("failed", json!(failed));
    }
    if !result.contains_key("changed") {
        result.insert("changed", json!(false));
    }
}

fn restore(vars: &mut Vars, key: &str, saved: Option<JsonValue>) {
    match saved {
        Some(value) => {
            vars.insert(key.to_string(), value);
        }
        None => {
            vars.shift_remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use crate::plugins::PluginRegistry;
    use crate::traits::ConditionalEvaluator;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Replays canned results; the last one repeats.
    struct Scripted {
        results: Mutex<VecDeque<TaskResult>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<TaskResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ActionHandler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&self, ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock();
            let mut result = if results.len() > 1 {
                results.pop_front().unwrap_or_default()
            } else {
                results.front().cloned().unwrap_or_default()
            };
            if let Some(item) = ctx.arg("echo") {
                result.insert("echo", item.clone());
            }
            Ok(result)
        }
    }

    struct Harness {
        services: ExecutorServices,
        opened: Arc<AtomicUsize>,
    }

    fn harness(action: Arc<Scripted>) -> Harness {
        let opened = Arc::new(AtomicUsize::new(0));
        let mut plugins = PluginRegistry::with_builtins();
        plugins.register_action(action);
        let counter = Arc::clone(&opened);
        plugins.register_connection(
            "counting",
            Arc::new(move |_: &ConnectionTarget| {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(LocalConnection::new()) as Box<dyn ConnectionHandler>
            }),
        );
        Harness {
            services: ExecutorServices::with_defaults(plugins),
            opened,
        }
    }

    fn scripted_task() -> TaskSpec {
        let mut task = TaskSpec::new("scripted task", "scripted");
        task.connection = Some("counting".into());
        task.delay = Some(0);
        task
    }

    async fn run(h: &Harness, task: &TaskSpec, vars: &mut Vars) -> TaskResult {
        let host = Host::new("localhost");
        let ctx = PlayContext::new();
        TaskExecutor::new(&h.services, &host, task, &ctx).run(vars).await
    }

    #[tokio::test]
    async fn test_when_false_skips_without_connecting() {
        let action = Scripted::new(vec![TaskResult::changed()]);
        let h = harness(Arc::clone(&action));
        let mut task = scripted_task();
        task.when = vec!["1 == 2".into()];

        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(result.is_skipped());
        assert_eq!(result.get("skip_reason"), Some(&json!("Conditional result was False")));
        assert_eq!(h.opened.load(Ordering::SeqCst), 0);
        assert_eq!(action.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_derived_from_rc() {
        let action = Scripted::new(vec![TaskResult::new().with("rc", json!(2))]);
        let h = harness(action);
        let result = run(&h, &scripted_task(), &mut Vars::new()).await;
        assert!(result.is_failed());
        assert_eq!(result.get("changed"), Some(&json!(false)));
        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_rc_is_not_a_failure() {
        let h = harness(Scripted::new(vec![TaskResult::new().with("rc", JsonValue::Null)]));
        let result = run(&h, &scripted_task(), &mut Vars::new()).await;
        assert!(!result.is_failed());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let action = Scripted::new(vec![TaskResult::new().with("rc", json!(1))]);
        let h = harness(Arc::clone(&action));
        let mut task = scripted_task();
        task.register = Some("out".into());
        task.until = vec!["out.rc == 0".into()];
        task.retries = Some(3);

        let mut vars = Vars::new();
        let result = run(&h, &task, &mut vars).await;
        assert!(result.is_failed());
        assert_eq!(result.get("attempts"), Some(&json!(4)));
        assert_eq!(action.calls.load(Ordering::SeqCst), 4);
        assert_eq!(vars["out"]["attempts"], json!(4));
    }

    #[tokio::test]
    async fn test_until_stops_on_success() {
        let action = Scripted::new(vec![
            TaskResult::new().with("rc", json!(1)),
            TaskResult::changed().with("rc", json!(0)),
        ]);
        let h = harness(Arc::clone(&action));
        let mut task = scripted_task();
        task.register = Some("out".into());
        task.until = vec!["out.rc == 0".into()];
        task.retries = Some(5);

        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(!result.is_failed());
        assert!(result.is_changed());
        assert_eq!(result.get("attempts"), Some(&json!(2)));
        assert_eq!(action.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_without_until_run_once() {
        let action = Scripted::new(vec![TaskResult::failed("nope")]);
        let h = harness(Arc::clone(&action));
        let mut task = scripted_task();
        task.retries = Some(5);

        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(result.is_failed());
        assert!(!result.contains_key("attempts"));
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_changed_and_failed_when() {
        let action = Scripted::new(vec![TaskResult::changed().with("rc", json!(3)).with("stdout", json!("boom"))]);
        let h = harness(action);
        let mut task = scripted_task();
        task.register = Some("out".into());
        task.changed_when = vec!["false".into()];
        task.failed_when = vec!["'boom' in out.stdout".into()];

        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(!result.is_changed());
        assert!(result.is_failed());

        let action = Scripted::new(vec![TaskResult::new().with("rc", json!(3))]);
        let h = harness(action);
        let mut task = scripted_task();
        task.failed_when = vec!["false".into()];
        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(!result.is_failed());
    }

    #[tokio::test]
    async fn test_loop_aggregates_results() {
        let action = Scripted::new(vec![TaskResult::changed()]);
        let h = harness(Arc::clone(&action));
        let mut task = scripted_task();
        task.loop_items = Some(json!(["a", "b", "c"]));
        task.when = vec!["item != 'b'".into()];
        task.args.insert("echo".into(), json!("{{ item }}"));
        task.register = Some("looped".into());

        let mut vars = Vars::new();
        let result = run(&h, &task, &mut vars).await;
        let results = result.get("results").and_then(JsonValue::as_array).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["echo"], json!("a"));
        assert_eq!(results[1]["skipped"], json!(true));
        assert_eq!(results[2]["item"], json!("c"));
        assert!(result.is_changed());
        assert!(!result.is_failed());
        assert_eq!(action.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
        assert!(!vars.contains_key("item"));
        assert_eq!(vars["looped"]["results"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_loop_from_template() {
        let action = Scripted::new(vec![TaskResult::ok()]);
        let h = harness(Arc::clone(&action));
        let mut task = scripted_task();
        task.loop_items = Some(json!("{{ packages }}"));

        let mut vars = Vars::new();
        vars.insert("packages".into(), json!(["nginx", "git"]));
        let result = run(&h, &task, &mut vars).await;
        assert_eq!(result.get("results").and_then(JsonValue::as_array).map(Vec::len), Some(2));

        let mut task = scripted_task();
        task.loop_items = Some(json!("not a list"));
        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(result.is_failed());
    }

    #[tokio::test]
    async fn test_unknown_connection_is_unreachable() {
        let h = harness(Scripted::new(vec![TaskResult::ok()]));
        let mut task = scripted_task();
        task.connection = Some("winrm".into());
        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(result.is_unreachable());
    }

    #[tokio::test]
    async fn test_notify_attached() {
        let h = harness(Scripted::new(vec![TaskResult::changed()]));
        let mut task = scripted_task();
        task.notify = vec!["restart nginx".into()];
        let mut result = run(&h, &task, &mut Vars::new()).await;
        assert_eq!(result.take_notify(), vec!["restart nginx".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_action_falls_back_to_normal() {
        let h = harness(Scripted::new(vec![TaskResult::ok()]));
        let mut task = scripted_task();
        task.action = "no_such_module".into();
        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(result.is_failed());
        assert!(result.msg().unwrap().contains("no_such_module"));
    }

    #[tokio::test]
    async fn test_undefined_variable_in_when_fails() {
        let h = harness(Scripted::new(vec![TaskResult::ok()]));
        let mut task = scripted_task();
        task.when = vec!["missing == 1".into()];
        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(result.is_failed());
    }

    mockall::mock! {
        Evaluator {}

        impl ConditionalEvaluator for Evaluator {
            fn evaluate(&self, expressions: &[String], vars: &Vars) -> ExecutorResult<bool>;
        }
    }

    #[tokio::test]
    async fn test_until_evaluation_error_fails_without_retrying() {
        let action = Scripted::new(vec![TaskResult::new().with("rc", json!(1))]);
        let mut h = harness(Arc::clone(&action));

        let mut evaluator = MockEvaluator::new();
        evaluator
            .expect_evaluate()
            .withf(|exprs, _| exprs.is_empty())
            .returning(|_, _| Ok(true));
        evaluator
            .expect_evaluate()
            .withf(|exprs, _| exprs.len() == 1 && exprs[0] == "out.rc == 0")
            .times(1)
            .returning(|_, _| Err(ExecutorError::ConditionError("'out' is undefined".into())));
        h.services.evaluator = Arc::new(evaluator);

        let mut task = scripted_task();
        task.register = Some("out".into());
        task.until = vec!["out.rc == 0".into()];
        task.retries = Some(5);

        let result = run(&h, &task, &mut Vars::new()).await;
        assert!(result.is_failed());
        assert!(result.msg().unwrap().contains("'out' is undefined"));
        assert_eq!(action.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_type_resolution() {
        let h = harness(Scripted::new(vec![]));
        let ctx = PlayContext::new();
        let task = TaskSpec::new("t", "ping");

        let local = Host::new("localhost");
        assert_eq!(TaskExecutor::new(&h.services, &local, &task, &ctx).connection_type(), "local");

        let remote = Host::new("web1");
        assert_eq!(TaskExecutor::new(&h.services, &remote, &task, &ctx).connection_type(), "ssh");

        let forced = Host::new("web1").with_var("ansible_connection", json!("local"));
        assert_eq!(TaskExecutor::new(&h.services, &forced, &task, &ctx).connection_type(), "local");

        let mut keyword = TaskSpec::new("t", "ping");
        keyword.connection = Some("local".into());
        assert_eq!(TaskExecutor::new(&h.services, &remote, &keyword, &ctx).connection_type(), "local");
        let cli = PlayContext {
            connection: Some("ssh".into()),
            ..PlayContext::default()
        };
        assert_eq!(TaskExecutor::new(&h.services, &remote, &keyword, &cli).connection_type(), "ssh");
        assert_eq!(TaskExecutor::new(&h.services, &forced, &keyword, &cli).connection_type(), "local");

        let mut delegated = TaskSpec::new("t", "ping");
        delegated.delegate_to = Some("127.0.0.1".into());
        assert_eq!(TaskExecutor::new(&h.services, &remote, &delegated, &ctx).connection_type(), "local");
    }
}
