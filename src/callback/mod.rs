//! Run progress reporting.
//!
//! The engine reports through [`ExecutionCallback`]. Two reporters ship
//! with the crate:
//!
//! - [`DefaultCallback`]: colored terminal output and the play recap
//! - [`LoggingCallback`]: one structured `tracing` event per result
//!
//! [`CallbackSet`] fans events out to several reporters. Results of
//! `no_log` tasks go through [`censor`] before any reporter shows them.

pub mod default;
pub mod logging;

pub use default::DefaultCallback;
pub use logging::LoggingCallback;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::executor::{RunStats, TaskResult, TaskSpec};
pub use crate::traits::{ExecutionCallback, NullCallback};

/// Message shown in place of a hidden result.
pub const CENSORED: &str = "the output has been hidden due to the fact that 'no_log: true' was specified for this result";

/// Keys that stay visible on a censored result.
const STATUS_KEYS: &[&str] = &["changed", "failed", "skipped", "unreachable"];

/// The result as it may be shown for this task: unchanged, or reduced to its
/// status flags when the task is `no_log`.
pub fn censor(task: &TaskSpec, result: &TaskResult) -> TaskResult {
    if !task.no_log {
        return result.clone();
    }
    let mut shown = TaskResult::new();
    for key in STATUS_KEYS {
        if let Some(value) = result.get(key) {
            shown.insert(*key, value.clone());
        }
    }
    shown.insert("censored", json!(CENSORED));
    shown
}

/// Forwards every event to each member in order.
#[derive(Default, Clone)]
pub struct CallbackSet {
    members: Vec<Arc<dyn ExecutionCallback>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, callback: Arc<dyn ExecutionCallback>) -> Self {
        self.members.push(callback);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl ExecutionCallback for CallbackSet {
    async fn on_playbook_start(&self, name: &str) {
        for cb in &self.members {
            cb.on_playbook_start(name).await;
        }
    }

    async fn on_playbook_end(&self, name: &str, success: bool) {
        for cb in &self.members {
            cb.on_playbook_end(name, success).await;
        }
    }

    async fn on_play_start(&self, name: &str, hosts: &[String]) {
        for cb in &self.members {
            cb.on_play_start(name, hosts).await;
        }
    }

    async fn on_play_end(&self, name: &str, success: bool) {
        for cb in &self.members {
            cb.on_play_end(name, success).await;
        }
    }

    async fn on_task_start(&self, name: &str, host: &str) {
        for cb in &self.members {
            cb.on_task_start(name, host).await;
        }
    }

    async fn on_task_result(&self, host: &str, task: &TaskSpec, result: &TaskResult) {
        for cb in &self.members {
            cb.on_task_result(host, task, result).await;
        }
    }

    async fn on_handler_triggered(&self, host: &str, name: &str) {
        for cb in &self.members {
            cb.on_handler_triggered(host, name).await;
        }
    }

    async fn on_stats(&self, stats: &RunStats) {
        for cb in &self.members {
            cb.on_stats(stats).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl ExecutionCallback for Recorder {
        async fn on_task_start(&self, name: &str, host: &str) {
            self.0.lock().push(format!("{}@{}", name, host));
        }
    }

    #[test]
    fn test_censor_keeps_status_only() {
        let mut task = TaskSpec::new("secret", "command");
        let result = TaskResult::changed().with("stdout", json!("hunter2")).with("rc", json!(0));
        assert_eq!(censor(&task, &result), result);

        task.no_log = true;
        let shown = censor(&task, &result);
        assert!(shown.is_changed());
        assert!(shown.get("stdout").is_none());
        assert_eq!(shown.get("censored"), Some(&json!(CENSORED)));
    }

    #[tokio::test]
    async fn test_set_forwards_to_every_member() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let set = CallbackSet::new().with(a.clone()).with(b.clone());
        set.on_task_start("t", "h").await;
        assert_eq!(a.0.lock().as_slice(), ["t@h"]);
        assert_eq!(b.0.lock().as_slice(), ["t@h"]);
    }
}
