//! `command`, `shell` and `raw`: run a command line on the host.
//!
//! `command` splits its argument into words and runs the program directly,
//! so pipes and redirects are passed through literally. `shell` and `raw`
//! hand the whole line to `sh -c`. A non-zero exit code is reported through
//! `rc`; the task executor turns it into a failure.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::executor::{ExecutorError, ExecutorResult, TaskResult};
use crate::playbook::attribute::json_to_plain_string;
use crate::traits::{ActionContext, ActionHandler};
use crate::vars::Vars;

/// Which flavour of command execution a handler performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Program and arguments, no shell
    Command,
    /// A shell line with `chdir`, `creates` and `removes` support
    Shell,
    /// A shell line with no extras
    Raw,
}

impl CommandKind {
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Command => "command",
            CommandKind::Shell => "shell",
            CommandKind::Raw => "raw",
        }
    }
}

/// Runs a command line through the task's connection.
#[derive(Debug, Clone, Copy)]
pub struct CommandAction {
    kind: CommandKind,
}

impl CommandAction {
    pub fn new(kind: CommandKind) -> Self {
        Self { kind }
    }

    /// The command text from `_raw_params` or `cmd`.
    fn command_text(ctx: &ActionContext<'_>) -> Option<String> {
        ctx.arg_str("_raw_params")
            .or_else(|| ctx.arg_str("cmd"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// The argument vector for `command`: `argv` if given, else the split
    /// command text.
    fn command_argv(ctx: &ActionContext<'_>) -> ExecutorResult<Vec<String>> {
        if let Some(JsonValue::Array(items)) = ctx.arg("argv") {
            return Ok(items.iter().map(json_to_plain_string).collect());
        }
        match Self::command_text(ctx) {
            Some(text) => shell_words::split(&text)
                .map_err(|e| ExecutorError::RuntimeError(format!("could not parse command '{}': {}", text, e))),
            None => Ok(Vec::new()),
        }
    }

    /// The argv to execute and the value reported as `cmd`.
    fn build(&self, ctx: &ActionContext<'_>) -> ExecutorResult<Option<(Vec<String>, JsonValue)>> {
        let chdir = ctx.arg_str("chdir");
        match self.kind {
            CommandKind::Command => {
                let argv = Self::command_argv(ctx)?;
                if argv.is_empty() {
                    return Ok(None);
                }
                let reported = json!(argv);
                let argv = match chdir {
                    // $0 carries the directory so neither it nor argv needs quoting
                    Some(dir) => {
                        let mut wrapped = vec![
                            "sh".to_string(),
                            "-c".to_string(),
                            "cd \"$0\" && exec \"$@\"".to_string(),
                            dir,
                        ];
                        wrapped.extend(argv);
                        wrapped
                    }
                    None => argv,
                };
                Ok(Some((argv, reported)))
            }
            CommandKind::Shell | CommandKind::Raw => {
                let Some(text) = Self::command_text(ctx) else {
                    return Ok(None);
                };
                let line = match chdir {
                    Some(dir) if self.kind == CommandKind::Shell => {
                        format!("cd {} && {}", shell_words::quote(&dir), text)
                    }
                    _ => text.clone(),
                };
                let executable = ctx
                    .arg_str("executable")
                    .unwrap_or_else(|| "/bin/sh".to_string());
                Ok(Some((vec![executable, "-c".to_string(), line], JsonValue::String(text))))
            }
        }
    }

    /// Honour `creates` and `removes`. Returns a result when the command
    /// should not run.
    async fn guard(&self, ctx: &ActionContext<'_>) -> ExecutorResult<Option<TaskResult>> {
        if self.kind == CommandKind::Raw {
            return Ok(None);
        }
        if let Some(path) = ctx.arg_str("creates") {
            if path_exists(ctx, &path).await? {
                return Ok(Some(not_run(format!("Did not run command since '{}' exists", path), &path, "exists")));
            }
        }
        if let Some(path) = ctx.arg_str("removes") {
            if !path_exists(ctx, &path).await? {
                return Ok(Some(not_run(
                    format!("Did not run command since '{}' does not exist", path),
                    &path,
                    "does not exist",
                )));
            }
        }
        Ok(None)
    }
}

async fn path_exists(ctx: &ActionContext<'_>, path: &str) -> ExecutorResult<bool> {
    let out = ctx
        .connection
        .execute(&["test".to_string(), "-e".to_string(), path.to_string()], None)
        .await?;
    Ok(out.success())
}

fn not_run(msg: String, path: &str, reason: &str) -> TaskResult {
    TaskResult::ok()
        .with("rc", json!(0))
        .with("stdout", JsonValue::String(format!("skipped, since {} {}", path, reason)))
        .with("stdout_lines", json!([format!("skipped, since {} {}", path, reason)]))
        .with("msg", JsonValue::String(msg))
}

#[async_trait]
impl ActionHandler for CommandAction {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn run(&self, ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
        let Some((argv, reported)) = self.build(ctx)? else {
            return Ok(TaskResult::failed(format!("no command given to {}", self.kind.name())).with("rc", json!(256)));
        };

        if let Some(result) = self.guard(ctx).await? {
            return Ok(result);
        }

        if ctx.check_mode() {
            return Ok(TaskResult::skipped("Command would have run if not in check mode").with("cmd", reported));
        }

        let stdin = ctx.arg_str("stdin");
        debug!(host = %ctx.host.name, action = %self.kind.name(), "Running command");
        let out = ctx.exec(&argv, stdin.as_deref()).await?;

        let mut result = TaskResult::changed()
            .with("cmd", reported)
            .with("rc", json!(out.rc))
            .with("stdout", JsonValue::String(out.stdout.trim_end_matches('\n').to_string()))
            .with("stderr", JsonValue::String(out.stderr.trim_end_matches('\n').to_string()))
            .with("stdout_lines", json!(out.stdout_lines()))
            .with("stderr_lines", json!(out.stderr.lines().collect::<Vec<_>>()));
        if !out.success() {
            result.insert("msg", json!("non-zero return code"));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TaskSpec;
    use crate::plugins::action::test_support::Fixture;

    async fn run(kind: CommandKind, task: TaskSpec) -> TaskResult {
        let fixture = Fixture::new(task).await;
        CommandAction::new(kind)
            .run(&fixture.ctx(), &Vars::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_command_does_not_use_shell() {
        let task = TaskSpec::new("echo", "command").with_arg("_raw_params", json!("echo 'a b' > /dev/null"));
        let result = run(CommandKind::Command, task).await;
        assert_eq!(result.get("stdout"), Some(&json!("a b > /dev/null")));
        assert_eq!(result.rc(), Some(0));
        assert!(result.is_changed());
        assert_eq!(result.get("cmd"), Some(&json!(["echo", "a b", ">", "/dev/null"])));
    }

    #[tokio::test]
    async fn test_shell_pipes_and_rc() {
        let task = TaskSpec::new("pipe", "shell").with_arg("_raw_params", json!("printf 'x\\ny\\n' | wc -l; exit 3"));
        let result = run(CommandKind::Shell, task).await;
        assert_eq!(result.rc(), Some(3));
        assert_eq!(result.get("stdout").and_then(|v| v.as_str()).map(str::trim), Some("2"));
        assert_eq!(result.msg(), Some("non-zero return code"));
        assert!(!result.contains_key("failed"));
    }

    #[tokio::test]
    async fn test_chdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();

        let task = TaskSpec::new("pwd", "command")
            .with_arg("_raw_params", json!("pwd"))
            .with_arg("chdir", json!(path.clone()));
        let result = run(CommandKind::Command, task).await;
        let stdout = result.get("stdout").and_then(|v| v.as_str()).unwrap();
        assert!(stdout.ends_with(dir.path().file_name().unwrap().to_str().unwrap()));

        let task = TaskSpec::new("pwd", "shell")
            .with_arg("_raw_params", json!("pwd"))
            .with_arg("chdir", json!(path));
        let result = run(CommandKind::Shell, task).await;
        let shell_stdout = result.get("stdout").and_then(|v| v.as_str()).unwrap();
        assert!(shell_stdout.ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_creates_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        std::fs::write(&marker, "").unwrap();
        let marker = marker.to_string_lossy().to_string();

        let task = TaskSpec::new("t", "command")
            .with_arg("_raw_params", json!("false"))
            .with_arg("creates", json!(marker.clone()));
        let result = run(CommandKind::Command, task).await;
        assert!(!result.is_changed());
        assert_eq!(result.rc(), Some(0));

        let task = TaskSpec::new("t", "command")
            .with_arg("_raw_params", json!("false"))
            .with_arg("removes", json!(format!("{}.missing", marker)));
        let result = run(CommandKind::Command, task).await;
        assert!(result.msg().unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_check_mode_skips() {
        let mut task = TaskSpec::new("t", "shell").with_arg("_raw_params", json!("touch /nonexistent/x"));
        task.check_mode = Some(true);
        let result = run(CommandKind::Shell, task).await;
        assert!(result.is_skipped());
    }

    #[tokio::test]
    async fn test_empty_command() {
        let result = run(CommandKind::Command, TaskSpec::new("t", "command")).await;
        assert!(result.is_failed());
    }

    #[tokio::test]
    async fn test_argv() {
        let task = TaskSpec::new("t", "command").with_arg("argv", json!(["printf", "%s-%s", "a", "b"]));
        let result = run(CommandKind::Command, task).await;
        assert_eq!(result.get("stdout"), Some(&json!("a-b")));
    }
}
