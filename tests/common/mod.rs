//! Shared fixtures for the integration tests.
//!
//! - [`ScriptedAction`]: an action whose outcome is chosen by its arguments
//!   and which records every call it receives
//! - [`RecordingCallback`]: keeps every engine event in order
//! - [`MockConnection`]: an in-process transport that is either reachable or not
//! - [`Harness`]: a playbook executor wired to all three
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};

use playengine::callback::logging::status_of;
use playengine::connection::{CommandResult, ConnectionError, ConnectionHandler, ConnectionResult};
use playengine::executor::{ExecutorResult, PlaybookRun};
pub use playengine::executor::HostStats;
use playengine::plugins::{ConnectionFactory, ConnectionTarget};
use playengine::prelude::*;

/// Action name the scripted handler answers to.
pub const STEP: &str = "step";

/// Transport name the mock connection is registered under.
pub const MOCK_TRANSPORT: &str = "mock";

// ============================================================================
// Scripted action
// ============================================================================

/// One call received by [`ScriptedAction`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub host: String,
    pub task: String,
    pub item: Option<JsonValue>,
}

/// An action driven entirely by its arguments:
///
/// - `outcome`: `ok` (default), `changed`, `failed` or `unreachable`
/// - `fail_on` / `change_on` / `unreachable_on`: hosts that get that outcome
/// - `sequence`: outcomes used for successive attempts on the same host
/// - `sleep_ms`: time spent before answering
#[derive(Default)]
pub struct ScriptedAction {
    calls: Mutex<Vec<Call>>,
    attempts: Mutex<HashMap<(String, String), usize>>,
    running: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    overlaps: AtomicUsize,
}

impl ScriptedAction {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Task names run on one host, in order.
    pub fn tasks_for(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.host == host)
            .map(|c| c.task.clone())
            .collect()
    }

    /// Hosts that ran a task, in order.
    pub fn hosts_for(&self, task: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.task == task)
            .map(|c| c.host.clone())
            .collect()
    }

    /// Most calls ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Times a host started a call while another of its calls was running.
    pub fn host_overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn outcome(&self, ctx: &ActionContext<'_>, attempt: usize) -> String {
        let host = ctx.host.name.as_str();
        let listed = |key: &str| {
            ctx.arg(key)
                .and_then(JsonValue::as_array)
                .map(|hosts| hosts.iter().any(|h| h.as_str() == Some(host)))
                .unwrap_or(false)
        };

        if let Some(sequence) = ctx.arg("sequence").and_then(JsonValue::as_array) {
            let index = attempt.min(sequence.len().saturating_sub(1));
            if let Some(step) = sequence.get(index).and_then(JsonValue::as_str) {
                return step.to_string();
            }
        }
        if listed("unreachable_on") {
            "unreachable".to_string()
        } else if listed("fail_on") {
            "failed".to_string()
        } else if listed("change_on") {
            "changed".to_string()
        } else {
            ctx.arg_str("outcome").unwrap_or_else(|| "ok".to_string())
        }
    }
}

#[async_trait]
impl ActionHandler for ScriptedAction {
    fn name(&self) -> &str {
        STEP
    }

    async fn run(&self, ctx: &ActionContext<'_>, vars: &Vars) -> ExecutorResult<TaskResult> {
        let host = ctx.host.name.clone();
        let task = ctx.task.name.clone();

        if !self.running.lock().insert(host.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry((host.clone(), task.clone())).or_insert(0);
            *count += 1;
            *count - 1
        };
        self.calls.lock().push(Call {
            host: host.clone(),
            task,
            item: vars.get("item").cloned(),
        });

        if let Some(ms) = ctx.arg("sleep_ms").and_then(JsonValue::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let outcome = self.outcome(ctx, attempt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.running.lock().remove(&host);

        let result = match outcome.as_str() {
            "changed" => TaskResult::changed(),
            "failed" => TaskResult::failed(format!("scripted failure on {}", host)),
            "unreachable" => TaskResult::unreachable(format!("scripted: {} is down", host)),
            "skipped" => TaskResult::skipped("scripted skip"),
            _ => TaskResult::ok(),
        };
        Ok(result.with("attempt", json!(attempt + 1)))
    }
}

// ============================================================================
// Recording callback
// ============================================================================

/// An engine event, reduced to what tests compare.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PlayStart(String),
    PlayEnd(String, bool),
    TaskStart { task: String, host: String },
    Result { task: String, host: String, status: String },
    Handler { host: String, name: String },
    Stats,
}

#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<Event>>,
    results: Mutex<Vec<(String, String, TaskResult)>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// `(task, status)` pairs reported for one host, in order.
    pub fn results_for(&self, host: &str) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Result { task, host: h, status } if h == host => Some((task.clone(), status.clone())),
                _ => None,
            })
            .collect()
    }

    /// The last full result reported for a task on a host.
    pub fn result(&self, host: &str, task: &str) -> Option<TaskResult> {
        self.results
            .lock()
            .iter()
            .rev()
            .find(|(h, t, _)| h == host && t == task)
            .map(|(_, _, r)| r.clone())
    }

    pub fn handlers_notified(&self, host: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Handler { host: h, name } if h == host => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn plays(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::PlayStart(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ExecutionCallback for RecordingCallback {
    async fn on_play_start(&self, name: &str, _hosts: &[String]) {
        self.events.lock().push(Event::PlayStart(name.to_string()));
    }

    async fn on_play_end(&self, name: &str, success: bool) {
        self.events.lock().push(Event::PlayEnd(name.to_string(), success));
    }

    async fn on_task_start(&self, name: &str, host: &str) {
        self.events.lock().push(Event::TaskStart {
            task: name.to_string(),
            host: host.to_string(),
        });
    }

    async fn on_task_result(&self, host: &str, task: &TaskSpec, result: &TaskResult) {
        self.events.lock().push(Event::Result {
            task: task.name.clone(),
            host: host.to_string(),
            status: status_of(result).to_string(),
        });
        self.results
            .lock()
            .push((host.to_string(), task.name.clone(), result.clone()));
    }

    async fn on_handler_triggered(&self, host: &str, name: &str) {
        self.events.lock().push(Event::Handler {
            host: host.to_string(),
            name: name.to_string(),
        });
    }

    async fn on_stats(&self, _stats: &RunStats) {
        self.events.lock().push(Event::Stats);
    }
}

// ============================================================================
// Mock transport
// ============================================================================

/// A transport that never leaves the process. Opening fails when the host
/// is marked down; every command succeeds with empty output.
pub struct MockConnection {
    host: String,
    down: bool,
    connected: bool,
}

impl MockConnection {
    pub fn new(host: impl Into<String>, down: bool) -> Self {
        Self {
            host: host.into(),
            down,
            connected: false,
        }
    }
}

#[async_trait]
impl ConnectionHandler for MockConnection {
    fn transport(&self) -> &str {
        MOCK_TRANSPORT
    }

    async fn connect(&mut self) -> ConnectionResult<()> {
        if self.down {
            return Err(ConnectionError::ConnectionFailed(format!("no route to {}", self.host)));
        }
        self.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.connected = false;
        Ok(())
    }

    async fn execute(&self, _cmd: &[String], _stdin: Option<&str>) -> ConnectionResult<CommandResult> {
        if !self.connected {
            return Err(ConnectionError::NotConnected);
        }
        Ok(CommandResult::new(0, "", ""))
    }

    async fn put_file(&self, _local: &Path, _remote: &Path) -> ConnectionResult<()> {
        Ok(())
    }

    async fn get_file(&self, _remote: &Path, _local: &Path) -> ConnectionResult<()> {
        Ok(())
    }
}

/// A transport factory whose connections to `down` hosts fail to open.
pub fn mock_transport(down: &[&str]) -> ConnectionFactory {
    let down: HashSet<String> = down.iter().map(|h| h.to_string()).collect();
    Arc::new(move |target: &ConnectionTarget| {
        let conn = MockConnection::new(target.host.clone(), down.contains(&target.host));
        Box::new(conn) as Box<dyn ConnectionHandler>
    })
}

// ============================================================================
// Harness
// ============================================================================

/// A playbook executor over scripted actions and mock connections.
pub struct Harness {
    pub action: Arc<ScriptedAction>,
    pub callback: Arc<RecordingCallback>,
    hosts: Vec<Host>,
    down: Vec<String>,
    forks: usize,
    context: PlayContext,
}

impl Harness {
    pub fn new(hosts: &[&str]) -> Self {
        Self {
            action: ScriptedAction::new(),
            callback: RecordingCallback::new(),
            hosts: hosts.iter().map(|h| Host::new(*h)).collect(),
            down: Vec::new(),
            forks: 5,
            context: PlayContext {
                connection: Some(MOCK_TRANSPORT.to_string()),
                ..PlayContext::default()
            },
        }
    }

    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks;
        self
    }

    /// Hosts whose connections cannot be opened.
    pub fn with_down(mut self, hosts: &[&str]) -> Self {
        self.down = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn with_hosts(mut self, hosts: Vec<Host>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_context(mut self, f: impl FnOnce(&mut PlayContext)) -> Self {
        f(&mut self.context);
        self
    }

    pub fn catalog() -> ModuleCatalog {
        let mut catalog = ModuleCatalog::builtin();
        catalog.add_module(STEP, "/dev/null");
        catalog
    }

    pub fn playbook(yaml: &str) -> Arc<Playbook> {
        Arc::new(Playbook::from_yaml_str(yaml, &Self::catalog()).expect("playbook should load"))
    }

    pub fn executor(&self) -> PlaybookExecutor {
        let mut registry = PluginRegistry::with_catalog(Self::catalog());
        registry.register_action(Arc::clone(&self.action) as Arc<dyn ActionHandler>);
        let down: Vec<&str> = self.down.iter().map(String::as_str).collect();
        registry.register_connection(MOCK_TRANSPORT, mock_transport(&down));

        let inventory = StaticInventory::from_hosts(self.hosts.clone());
        PlaybookExecutor::new(Arc::new(inventory), ExecutorServices::with_defaults(registry))
            .with_config(QueueConfig::default().with_forks(self.forks))
            .with_context(self.context.clone())
            .with_callback(Arc::clone(&self.callback) as Arc<dyn ExecutionCallback>)
    }

    pub async fn run(&self, yaml: &str) -> PlaybookRun {
        self.executor()
            .run(Self::playbook(yaml))
            .await
            .expect("run should not error")
    }
}

/// Counters for one host, or all zeros when the host never ran.
pub fn stats_of(run: &PlaybookRun, host: &str) -> HostStats {
    run.stats.get(host).copied().unwrap_or_default()
}
