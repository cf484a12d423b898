//! Core execution engine for Playengine
//!
//! This module drives a loaded playbook against an inventory:
//! - [`iterator::PlayIterator`]: the per-host block/rescue/always state machine
//! - [`task_executor::TaskExecutor`]: one task on one host, with retries and loops
//! - [`queue::TaskQueueManager`]: the worker pool and per-host dispatch loop
//! - [`batch`]: serial batching of a play's hosts
//! - [`playbook::PlaybookExecutor`]: plays and batches in order, run codes

pub mod batch;
pub mod handlers;
pub mod iterator;
pub mod playbook;
pub mod queue;
pub mod stats;
pub mod task;
pub mod task_executor;

pub use batch::{get_serialized_batches, SerialSize};
pub use iterator::{FailState, GatheringPolicy, HostState, PlayIterator, RunState};
pub use playbook::{PlaybookExecutor, PlaybookRun};
pub use queue::{PlayOutcome, PlayPlan, QueueConfig, TaskQueueManager};
pub use stats::{HostStats, RunStats, StatKind};
pub use task::{TaskResult, TaskSpec};
pub use task_executor::TaskExecutor;

use std::sync::Arc;

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::plugins::{ActionCache, PluginRegistry};
use crate::template::JinjaEvaluator;
use crate::traits::ConditionalEvaluator;

/// Errors that can occur while running tasks.
///
/// These never abort a run on their own: the task executor turns them into
/// a failed or unreachable result for the host concerned.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Condition evaluation failed: {0}")]
    ConditionError(String),

    #[error("Template rendering failed: {0}")]
    TemplateError(String),

    #[error("The action '{0}' was not found")]
    ActionNotFound(String),

    #[error("Unsupported connection type: {0}")]
    ConnectionNotFound(String),

    #[error("{0}")]
    ConnectionFailed(#[from] ConnectionError),

    #[error("Task timed out after {0} seconds")]
    TaskTimeout(u64),

    #[error("Worker channel closed")]
    ChannelClosed,

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExecutorError {
    /// Whether the error means the host could not be reached.
    pub fn is_unreachable(&self) -> bool {
        match self {
            ExecutorError::ConnectionNotFound(_) => true,
            ExecutorError::ConnectionFailed(err) => matches!(
                err,
                ConnectionError::ConnectionFailed(_)
                    | ConnectionError::Timeout(_)
                    | ConnectionError::NotConnected
                    | ConnectionError::UnsupportedTransport(_)
            ),
            _ => false,
        }
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Process-level outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RunCode {
    /// Every host completed without an unrecovered failure
    #[default]
    Ok = 0,
    /// Generic error, such as a malformed playbook
    Error = 1,
    /// At least one host failed
    FailedHosts = 2,
    /// At least one host was unreachable
    UnreachableHosts = 4,
    /// A play was stopped early by its failure policy
    FailedBreakPlay = 8,
    UnknownError = 255,
}

impl RunCode {
    pub fn exit_code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == RunCode::Ok
    }

    fn severity(self) -> u8 {
        match self {
            RunCode::Ok => 0,
            RunCode::UnreachableHosts => 1,
            RunCode::FailedHosts => 2,
            RunCode::FailedBreakPlay => 3,
            RunCode::Error => 4,
            RunCode::UnknownError => 5,
        }
    }

    /// The more severe of two codes.
    pub fn combine(self, other: RunCode) -> RunCode {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for RunCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunCode::Ok => "ok",
            RunCode::Error => "error",
            RunCode::FailedHosts => "failed hosts",
            RunCode::UnreachableHosts => "unreachable hosts",
            RunCode::FailedBreakPlay => "play stopped by failure policy",
            RunCode::UnknownError => "unknown error",
        };
        write!(f, "{}", name)
    }
}

/// Collaborators shared by every worker: action and connection plugins,
/// the conditional evaluator and the action payload cache.
#[derive(Clone)]
pub struct ExecutorServices {
    pub plugins: Arc<PluginRegistry>,
    pub evaluator: Arc<dyn ConditionalEvaluator>,
    pub cache: Arc<ActionCache>,
}

impl ExecutorServices {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        evaluator: Arc<dyn ConditionalEvaluator>,
        cache: Arc<ActionCache>,
    ) -> Self {
        Self {
            plugins,
            evaluator,
            cache,
        }
    }

    /// Built-in plugins, the Jinja evaluator and an empty cache.
    pub fn with_defaults(plugins: PluginRegistry) -> Self {
        Self::new(
            Arc::new(plugins),
            Arc::new(JinjaEvaluator::new()),
            Arc::new(ActionCache::new()),
        )
    }
}

impl std::fmt::Debug for ExecutorServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorServices")
            .field("plugins", &self.plugins)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
