//! Small actions that run entirely on the control node.

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};

use crate::executor::task::coerce_bool;
use crate::executor::{ExecutorResult, TaskResult};
use crate::playbook::attribute::json_to_plain_string;
use crate::traits::{ActionContext, ActionHandler};
use crate::vars::Vars;

/// `set_fact`: the arguments become host facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetFactAction;

#[async_trait]
impl ActionHandler for SetFactAction {
    fn name(&self) -> &str {
        "set_fact"
    }

    async fn run(&self, ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        let facts: Map<String, JsonValue> = ctx
            .args
            .iter()
            .filter(|(k, _)| k.as_str() != "cacheable" && !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if facts.is_empty() {
            return Ok(TaskResult::failed("No key/value pairs provided, at least one is required for this action to succeed"));
        }
        Ok(TaskResult::ok().with("ansible_facts", JsonValue::Object(facts)))
    }
}

/// `fail`: always fails with `msg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailAction;

#[async_trait]
impl ActionHandler for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        let msg = ctx
            .arg_str("msg")
            .unwrap_or_else(|| "Failed as requested from task".to_string());
        Ok(TaskResult::failed(msg))
    }
}

/// `ping`: answers `pong`, or echoes `data`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingAction;

#[async_trait]
impl ActionHandler for PingAction {
    fn name(&self) -> &str {
        "ping"
    }

    async fn run(&self, ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        let data = ctx.arg("data").cloned().unwrap_or_else(|| json!("pong"));
        Ok(TaskResult::ok().with("ping", data))
    }
}

/// `assert`: fails unless every expression in `that` holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertAction;

impl AssertAction {
    fn conditions(ctx: &ActionContext<'_>) -> Vec<JsonValue> {
        match ctx.arg("that") {
            Some(JsonValue::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ActionHandler for AssertAction {
    fn name(&self) -> &str {
        "assert"
    }

    async fn run(&self, ctx: &ActionContext<'_>, vars: &Vars) -> ExecutorResult<TaskResult> {
        let conditions = Self::conditions(ctx);
        if conditions.is_empty() {
            return Ok(TaskResult::failed("conditional required in \"that\" string"));
        }

        for condition in &conditions {
            let holds = match condition {
                JsonValue::String(expr) => ctx.evaluator.evaluate(std::slice::from_ref(expr), vars)?,
                // Already rendered to a value by argument templating
                other => coerce_bool(other),
            };
            if !holds {
                let msg = ctx
                    .arg_str("fail_msg")
                    .or_else(|| ctx.arg_str("msg"))
                    .unwrap_or_else(|| "Assertion failed".to_string());
                return Ok(TaskResult::failed(msg)
                    .with("assertion", JsonValue::String(json_to_plain_string(condition)))
                    .with("evaluated_to", json!(false)));
            }
        }

        let mut result = TaskResult::ok();
        if !ctx.arg("quiet").map(coerce_bool).unwrap_or(false) {
            let msg = ctx
                .arg_str("success_msg")
                .unwrap_or_else(|| "All assertions passed".to_string());
            result.insert("msg", JsonValue::String(msg));
        }
        Ok(result)
    }
}

/// `meta` outside a play run. The play runner handles directives in-band,
/// so reaching this handler means there is nothing to do.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaAction;

#[async_trait]
impl ActionHandler for MetaAction {
    fn name(&self) -> &str {
        "meta"
    }

    async fn run(&self, _ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        Ok(TaskResult::ok())
    }
}

/// Include and import actions. Task files are not expanded at run time, so
/// these are reported as skipped.
#[derive(Debug, Clone)]
pub struct SkippedAction {
    name: &'static str,
}

impl SkippedAction {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl ActionHandler for SkippedAction {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        Ok(TaskResult::skipped(format!("{} is not expanded by this engine", self.name)))
    }
}
