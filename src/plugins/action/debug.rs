//! `debug`: report a message or a variable's value. Runs on the control node.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::executor::{ExecutorResult, TaskResult};
use crate::traits::{ActionContext, ActionHandler};
use crate::vars::Vars;

const UNDEFINED: &str = "VARIABLE IS NOT DEFINED!";

#[derive(Debug, Clone, Copy, Default)]
pub struct DebugAction;

/// Walk a dotted path such as `out.stdout_lines.0` through `vars`.
fn lookup<'v>(vars: &'v Vars, path: &str) -> Option<&'v JsonValue> {
    let mut parts = path.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = match current {
            JsonValue::Object(map) => map.get(part)?,
            JsonValue::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[async_trait]
impl ActionHandler for DebugAction {
    fn name(&self) -> &str {
        "debug"
    }

    async fn run(&self, ctx: &ActionContext<'_>, vars: &Vars) -> ExecutorResult<TaskResult> {
        if let Some(var) = ctx.arg_str("var") {
            let value = match lookup(vars, var.trim()) {
                Some(value) => value.clone(),
                // Not a plain path: treat it as an expression
                None => ctx
                    .evaluator
                    .render(&JsonValue::String(format!("{{{{ {} }}}}", var)), vars)
                    .unwrap_or_else(|_| json!(UNDEFINED)),
            };
            return Ok(TaskResult::ok().with(var, value));
        }

        let msg = ctx.arg("msg").cloned().unwrap_or_else(|| json!("Hello world!"));
        Ok(TaskResult::ok().with("msg", msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TaskSpec;
    use crate::plugins::action::test_support::Fixture;

    fn vars() -> Vars {
        let mut vars = Vars::new();
        vars.insert("out".into(), json!({"stdout_lines": ["a", "b"], "rc": 0}));
        vars.insert("count".into(), json!(2));
        vars
    }

    async fn run(task: TaskSpec) -> TaskResult {
        let fixture = Fixture::new(task).await;
        DebugAction.run(&fixture.ctx(), &vars()).await.unwrap()
    }

    #[tokio::test]
    async fn test_default_message() {
        let result = run(TaskSpec::new("t", "debug")).await;
        assert_eq!(result.msg(), Some("Hello world!"));
        assert!(!result.is_changed());
    }

    #[tokio::test]
    async fn test_var_paths() {
        let result = run(TaskSpec::new("t", "debug").with_arg("var", json!("out.stdout_lines.1"))).await;
        assert_eq!(result.get("out.stdout_lines.1"), Some(&json!("b")));

        let result = run(TaskSpec::new("t", "debug").with_arg("var", json!("count + 1"))).await;
        assert_eq!(result.get("count + 1"), Some(&json!(3)));

        let result = run(TaskSpec::new("t", "debug").with_arg("var", json!("missing"))).await;
        assert_eq!(result.get("missing"), Some(&json!(UNDEFINED)));
    }
}
