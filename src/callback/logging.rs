//! Structured run events through `tracing`.
//!
//! Every result becomes one event under the `playengine::run` target with
//! the host, task and status as fields, so the JSON log format carries the
//! whole run history.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::censor;
use crate::executor::{RunStats, TaskResult, TaskSpec};
use crate::traits::ExecutionCallback;

const TARGET: &str = "playengine::run";

/// Status word for a result.
pub fn status_of(result: &TaskResult) -> &'static str {
    if result.is_unreachable() {
        "unreachable"
    } else if result.is_failed() {
        "failed"
    } else if result.is_skipped() {
        "skipped"
    } else if result.is_changed() {
        "changed"
    } else {
        "ok"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCallback;

impl LoggingCallback {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionCallback for LoggingCallback {
    async fn on_playbook_start(&self, name: &str) {
        info!(target: TARGET, playbook = %name, "playbook started");
    }

    async fn on_playbook_end(&self, name: &str, success: bool) {
        info!(target: TARGET, playbook = %name, success, "playbook finished");
    }

    async fn on_play_start(&self, name: &str, hosts: &[String]) {
        info!(target: TARGET, play = %name, hosts = hosts.len(), "play started");
    }

    async fn on_play_end(&self, name: &str, success: bool) {
        info!(target: TARGET, play = %name, success, "play finished");
    }

    async fn on_task_start(&self, name: &str, host: &str) {
        debug!(target: TARGET, task = %name, host = %host, "task started");
    }

    async fn on_task_result(&self, host: &str, task: &TaskSpec, result: &TaskResult) {
        let shown = censor(task, result);
        let status = status_of(&shown);
        let body = serde_json::to_string(&shown.to_json()).unwrap_or_default();
        match status {
            "failed" if task.ignore_errors => {
                info!(target: TARGET, host = %host, task = %task.name, status, ignored = true, result = %body, "task result")
            }
            "failed" => error!(target: TARGET, host = %host, task = %task.name, status, result = %body, "task result"),
            "unreachable" => warn!(target: TARGET, host = %host, task = %task.name, status, result = %body, "task result"),
            _ => info!(target: TARGET, host = %host, task = %task.name, status, "task result"),
        }
        debug!(target: TARGET, host = %host, task = %task.name, result = %body, "task result detail");
    }

    async fn on_handler_triggered(&self, host: &str, name: &str) {
        debug!(target: TARGET, host = %host, handler = %name, "handler notified");
    }

    async fn on_stats(&self, stats: &RunStats) {
        for (host, s) in stats.hosts() {
            info!(
                target: TARGET,
                host = %host,
                ok = s.ok,
                changed = s.changed,
                unreachable = s.unreachable,
                failed = s.failed,
                skipped = s.skipped,
                rescued = s.rescued,
                ignored = s.ignored,
                "host recap"
            );
        }
    }
}
