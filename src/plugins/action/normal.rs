//! The fallback action: run a module file from the catalog on the host.
//!
//! The module is copied into a fresh temp directory on the host and run
//! with the task arguments as a JSON object on stdin. A module answers with
//! a JSON object on stdout; anything else is reported as raw
//! `rc`/`stdout`/`stderr`. The temp directory is removed afterwards even
//! when the module fails.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::CommandResult;
use crate::executor::{ExecutorError, ExecutorResult, TaskResult};
use crate::traits::{ActionContext, ActionHandler};
use crate::vars::Vars;

const REMOTE_TMP: &str = "/tmp";

/// Runs catalog modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalAction;

impl NormalAction {
    async fn setup_tmpdir(ctx: &ActionContext<'_>) -> ExecutorResult<String> {
        let tmpdir = format!("{}/.playengine-{}", REMOTE_TMP, Uuid::new_v4().simple());
        let out = ctx
            .connection
            .execute(&["mkdir".into(), "-p".into(), "-m".into(), "0755".into(), tmpdir.clone()], None)
            .await?;
        if !out.success() {
            return Err(ExecutorError::RuntimeError(format!(
                "could not create remote temp dir {}: {}",
                tmpdir,
                out.combined_output().trim()
            )));
        }
        Ok(tmpdir)
    }

    async fn cleanup(ctx: &ActionContext<'_>, tmpdir: &str) {
        let cmd = ["rm".to_string(), "-rf".to_string(), tmpdir.to_string()];
        match ctx.connection.execute(&cmd, None).await {
            Ok(out) if out.success() => {}
            Ok(out) => warn!(host = %ctx.host.name, tmpdir, stderr = %out.stderr.trim(), "Failed to remove remote temp dir"),
            Err(e) => warn!(host = %ctx.host.name, tmpdir, error = %e, "Failed to remove remote temp dir"),
        }
    }

    async fn transfer_and_run(
        ctx: &ActionContext<'_>,
        tmpdir: &str,
        module: &str,
    ) -> ExecutorResult<CommandResult> {
        let local = ctx
            .catalog
            .module_path(module)
            .ok_or_else(|| ExecutorError::ActionNotFound(module.to_string()))?;
        let payload = ctx.cache.get_or_load(module, local).await?;

        let remote = PathBuf::from(tmpdir).join(&payload.name);
        let remote_str = remote.to_string_lossy().to_string();
        ctx.connection.put_file(&payload.path, &remote).await?;
        ctx.connection
            .execute(&["chmod".into(), "0755".into(), remote_str.clone()], None)
            .await?;

        let argv = if payload.has_shebang() {
            vec![remote_str]
        } else {
            vec!["/bin/sh".to_string(), remote_str]
        };
        let stdin = serde_json::to_string(ctx.args)
            .map_err(|e| ExecutorError::RuntimeError(format!("could not encode module arguments: {}", e)))?;

        debug!(host = %ctx.host.name, module, "Executing module");
        ctx.exec(&argv, Some(&stdin)).await
    }
}

/// Pull the JSON object out of module output, skipping any noise printed
/// before or after it.
pub fn parse_module_output(stdout: &str) -> Option<serde_json::Map<String, JsonValue>> {
    if let Ok(JsonValue::Object(map)) = serde_json::from_str(stdout.trim()) {
        return Some(map);
    }
    let lines: Vec<&str> = stdout.lines().collect();
    let start = lines.iter().position(|l| l.trim_start().starts_with('{'))?;
    let end = lines.iter().rposition(|l| l.trim_end().ends_with('}'))?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&lines[start..=end].join("\n")) {
        Ok(JsonValue::Object(map)) => Some(map),
        _ => None,
    }
}

#[async_trait]
impl ActionHandler for NormalAction {
    fn name(&self) -> &str {
        "normal"
    }

    async fn run(&self, ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        let module = ctx.catalog.canonical_name(&ctx.task.action).to_string();
        if ctx.catalog.module_path(&module).is_none() {
            return Err(ExecutorError::ActionNotFound(module));
        }
        if ctx.check_mode() {
            return Ok(TaskResult::skipped(format!("module {} does not support check mode", module)));
        }

        let tmpdir = Self::setup_tmpdir(ctx).await?;
        let outcome = Self::transfer_and_run(ctx, &tmpdir, &module).await;
        Self::cleanup(ctx, &tmpdir).await;
        let out = outcome?;

        match parse_module_output(&out.stdout) {
            Some(map) => Ok(TaskResult::from_json(JsonValue::Object(map))),
            None => {
                let mut result = TaskResult::new()
                    .with("rc", json!(out.rc))
                    .with("stdout", JsonValue::String(out.stdout))
                    .with("stderr", JsonValue::String(out.stderr));
                if out.rc != 0 {
                    result.insert("msg", json!("MODULE FAILURE"));
                } else {
                    result.insert("msg", json!("module returned no JSON result"));
                    result.insert("failed", json!(true));
                }
                Ok(result)
            }
        }
    }
}
