//! Task queue manager: the worker pool and the per-host dispatch loop.
//!
//! A play's hosts are split into serial batches. For each batch a pool of
//! `forks` workers is spawned; the coordinator hands each ready host its next
//! task from the [`PlayIterator`], never more than one task per host at a
//! time, and feeds results back into the iterator before the host is asked
//! for another task. Hosts progress independently, so a slow host does not
//! hold back the others.
//!
//! `meta` directives never reach a worker. They act on the coordinator's own
//! state: flushing handlers, ending a host or the play, clearing errors.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::handlers::HandlerTracker;
use super::iterator::{GatheringPolicy, PlayIterator};
use super::stats::{RunStats, StatKind};
use super::task::{TaskResult, TaskSpec};
use super::task_executor::TaskExecutor;
use super::{get_serialized_batches, ExecutorError, ExecutorResult, ExecutorServices, RunCode};
use crate::executor::batch::parse_serial;
use crate::inventory::Host;
use crate::playbook::compile::compile_handlers;
use crate::playbook::{EntityId, PlayContext, Playbook, Resolve};
use crate::traits::ExecutionCallback;
use crate::vars::{merge_vars, Vars};

/// Default number of concurrent workers.
pub const DEFAULT_FORKS: usize = 5;

/// Default limit on a single task's run time.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Number of workers; values below 1 are treated as 1
    pub forks: usize,
    /// Per-task time limit; `None` waits forever
    pub task_timeout: Option<Duration>,
    pub gathering: GatheringPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            forks: DEFAULT_FORKS,
            task_timeout: Some(DEFAULT_TASK_TIMEOUT),
            gathering: GatheringPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_gathering(mut self, gathering: GatheringPolicy) -> Self {
        self.gathering = gathering;
        self
    }

    fn worker_count(&self) -> usize {
        self.forks.max(1)
    }
}

/// One play, its target hosts and its run settings.
#[derive(Debug, Clone)]
pub struct PlayPlan {
    pub book: Arc<Playbook>,
    pub play: EntityId,
    pub name: String,
    /// Hosts in inventory order; the play's `order` field is applied later
    pub hosts: Vec<Host>,
    /// Context already derived for this play
    pub context: PlayContext,
}

impl PlayPlan {
    pub fn new(book: Arc<Playbook>, play: EntityId, hosts: Vec<Host>, base: &PlayContext) -> Self {
        let context = base.for_play(&book, play);
        let name = book.name(play);
        Self {
            book,
            play,
            name,
            hosts,
            context,
        }
    }

    /// Hosts sorted by the play's `order` field.
    fn ordered_hosts(&self) -> Vec<Host> {
        let mut hosts = self.hosts.clone();
        let order = self.book.entity_ref(self.play).get_string("order");
        match order.as_deref() {
            None | Some("inventory") => {}
            Some("reverse_inventory") => hosts.reverse(),
            Some("sorted") => hosts.sort_by(|a, b| a.name.cmp(&b.name)),
            Some("reverse_sorted") => hosts.sort_by(|a, b| b.name.cmp(&a.name)),
            Some(other) => debug!(order = %other, "Host order not supported, using inventory order"),
        }
        hosts
    }
}

/// How a play ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayOutcome {
    pub code: RunCode,
    /// Later plays must not run
    pub stop: bool,
}

/// What the coordinator does next for a host.
enum Work {
    Task(Arc<TaskSpec>),
    Done,
}

/// Which lists the coordinator draws tasks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Tasks,
    Handlers,
}

struct Job {
    host: Arc<Host>,
    task: Arc<TaskSpec>,
    vars: Vars,
    context: Arc<PlayContext>,
}

struct JobResult {
    host: String,
    task: Arc<TaskSpec>,
    result: TaskResult,
}

/// Workers of one batch sharing a job queue.
struct WorkerPool {
    jobs: mpsc::Sender<Job>,
    results: mpsc::Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(size: usize, services: &ExecutorServices, timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>(size);
        let (result_tx, result_rx) = mpsc::channel::<JobResult>(size);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..size)
            .map(|id| {
                let jobs = Arc::clone(&job_rx);
                let results = result_tx.clone();
                let services = services.clone();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(id, jobs, results, services, timeout, cancel))
            })
            .collect();

        Self {
            jobs: job_tx,
            results: result_rx,
            workers,
        }
    }

    async fn shutdown(self) {
        drop(self.jobs);
        drop(self.results);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobResult>,
    services: ExecutorServices,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(Job { host, task, mut vars, context }) = job else {
            break;
        };

        debug!(worker = id, host = %host.name, task = %task.name, "Worker picked up task");
        let executor = TaskExecutor::new(&services, &host, &task, &context);
        let run = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, executor.run(&mut vars)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(host = %host.name, task = %task.name, "Task timed out");
                        TaskResult::failed(ExecutorError::TaskTimeout(limit.as_secs()).to_string())
                    }
                },
                None => executor.run(&mut vars).await,
            }
        };
        // A running task is dropped on cancellation; local and ssh children are killed on drop
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(worker = id, host = %host.name, task = %task.name, "Task cancelled");
                TaskResult::failed("Task cancelled")
            }
            result = run => result,
        };

        let done = JobResult {
            host: host.name.clone(),
            task,
            result,
        };
        if results.send(done).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "Worker stopped");
}

/// Coordinator state for one batch.
struct BatchRun<'p> {
    plan: &'p PlayPlan,
    context: Arc<PlayContext>,
    iterator: PlayIterator,
    hosts: HashMap<String, Arc<Host>>,
    order: Vec<String>,
    play_hosts: Vec<String>,
    tracker: HandlerTracker,
    /// Handlers flushed for a host and not yet dispatched
    handler_queues: HashMap<String, VecDeque<Arc<TaskSpec>>>,
    specs: HashMap<EntityId, Arc<TaskSpec>>,
    break_play: bool,
    end_play: bool,
}

impl<'p> BatchRun<'p> {
    fn spec(&mut self, id: EntityId) -> Arc<TaskSpec> {
        let book = &self.plan.book;
        Arc::clone(
            self.specs
                .entry(id)
                .or_insert_with(|| Arc::new(TaskSpec::from_entity(book, id))),
        )
    }

    fn end_all(&mut self) {
        for host in &self.order {
            self.iterator.set_host_complete(host);
            self.handler_queues.remove(host);
        }
    }
}

/// Runs plays on a worker pool and keeps run-wide host state.
pub struct TaskQueueManager {
    config: QueueConfig,
    services: ExecutorServices,
    callback: Arc<dyn ExecutionCallback>,
    cancel: CancellationToken,
    stats: RunStats,
    failed_hosts: HashSet<String>,
    unreachable_hosts: HashSet<String>,
    /// Hosts whose facts were gathered during this run
    gathered: HashSet<String>,
    facts: HashMap<String, Vars>,
    /// Registered results and `set_fact` values
    host_vars: HashMap<String, Vars>,
}

impl TaskQueueManager {
    pub fn new(config: QueueConfig, services: ExecutorServices, callback: Arc<dyn ExecutionCallback>) -> Self {
        Self {
            config,
            services,
            callback,
            cancel: CancellationToken::new(),
            stats: RunStats::new(),
            failed_hosts: HashSet::new(),
            unreachable_hosts: HashSet::new(),
            gathered: HashSet::new(),
            facts: HashMap::new(),
            host_vars: HashMap::new(),
        }
    }

    /// Use an external token to stop the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn failed_hosts(&self) -> &HashSet<String> {
        &self.failed_hosts
    }

    pub fn unreachable_hosts(&self) -> &HashSet<String> {
        &self.unreachable_hosts
    }

    /// Stop dispatching and abandon the running batch.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Facts and registered values recorded for a host.
    pub fn host_vars(&self, host: &str) -> Vars {
        let mut vars = self.facts.get(host).cloned().unwrap_or_default();
        if let Some(own) = self.host_vars.get(host) {
            merge_vars(&mut vars, own);
        }
        vars
    }

    fn is_dead(&self, host: &str) -> bool {
        self.failed_hosts.contains(host) || self.unreachable_hosts.contains(host)
    }

    /// Run one play over its hosts, batch by batch.
    #[instrument(skip(self, plan), fields(play = %plan.name))]
    pub async fn run_play(&mut self, plan: &PlayPlan) -> ExecutorResult<PlayOutcome> {
        let hosts: Vec<Arc<Host>> = plan
            .ordered_hosts()
            .into_iter()
            .filter(|h| !self.is_dead(&h.name))
            .map(Arc::new)
            .collect();
        if hosts.is_empty() {
            warn!("No hosts remaining for play '{}'", plan.name);
            return Ok(PlayOutcome {
                code: RunCode::Ok,
                stop: false,
            });
        }
        info!("Starting play: {} ({} hosts)", plan.name, hosts.len());

        let view = plan.book.entity_ref(plan.play);
        let serial = parse_serial(&view.get_list("serial"))?;
        let batches = get_serialized_batches(&serial, &hosts);
        let handlers: Vec<Arc<TaskSpec>> = compile_handlers(&plan.book, plan.play)
            .into_iter()
            .map(|id| Arc::new(TaskSpec::from_entity(&plan.book, id)))
            .collect();
        let play_hosts: Vec<String> = hosts.iter().map(|h| h.name.clone()).collect();

        let mut code = RunCode::Ok;
        let mut stop = false;
        for (index, batch) in batches.into_iter().enumerate() {
            let batch: Vec<Arc<Host>> = batch.into_iter().filter(|h| !self.is_dead(&h.name)).collect();
            if batch.is_empty() {
                continue;
            }
            debug!(batch = index, hosts = batch.len(), "Running batch");

            let (break_play, end_play) = self.run_batch(plan, &batch, &handlers, &play_hosts).await?;
            if break_play {
                code = RunCode::FailedBreakPlay;
                stop = true;
                break;
            }
            if batch.iter().all(|h| self.is_dead(&h.name)) {
                warn!("All hosts of the batch failed, stopping");
                stop = true;
                break;
            }
            if end_play {
                break;
            }
        }

        if play_hosts.iter().any(|h| self.failed_hosts.contains(h)) {
            code = code.combine(RunCode::FailedHosts);
        }
        if play_hosts.iter().any(|h| self.unreachable_hosts.contains(h)) {
            code = code.combine(RunCode::UnreachableHosts);
        }
        Ok(PlayOutcome { code, stop })
    }

    /// Run a batch to completion. Returns whether the failure policy broke
    /// the play and whether `end_play` was reached.
    async fn run_batch(
        &mut self,
        plan: &PlayPlan,
        batch: &[Arc<Host>],
        handlers: &[Arc<TaskSpec>],
        play_hosts: &[String],
    ) -> ExecutorResult<(bool, bool)> {
        let order: Vec<String> = batch.iter().map(|h| h.name.clone()).collect();
        let iterator = PlayIterator::for_play(
            &plan.book,
            plan.play,
            &order,
            &plan.context,
            self.config.gathering,
            self.gathered.clone(),
        );
        let mut run = BatchRun {
            plan,
            context: Arc::new(plan.context.clone()),
            iterator,
            hosts: batch.iter().map(|h| (h.name.clone(), Arc::clone(h))).collect(),
            order,
            play_hosts: play_hosts.to_vec(),
            tracker: HandlerTracker::new(handlers.to_vec()),
            handler_queues: HashMap::new(),
            specs: HashMap::new(),
            break_play: false,
            end_play: false,
        };

        let mut pool = WorkerPool::spawn(
            self.config.worker_count(),
            &self.services,
            self.config.task_timeout,
            self.cancel.child_token(),
        );
        let outcome = self.drive(&mut run, &mut pool).await;
        pool.shutdown().await;
        outcome?;

        for host in &run.order {
            if run.iterator.is_failed(host) {
                self.failed_hosts.insert(host.clone());
            }
        }

        let view = plan.book.entity_ref(plan.play);
        let failed = run.order.iter().filter(|h| self.is_dead(h)).count();
        if failed > 0 && view.get_bool("any_errors_fatal") {
            run.break_play = true;
        }
        if let Some(max) = view.get_float("max_fail_percentage") {
            let ratio = failed as f64 / run.order.len() as f64;
            if ratio * 100.0 > max {
                warn!(failed, hosts = run.order.len(), max, "Maximum failure percentage exceeded");
                run.break_play = true;
            }
        }
        Ok((run.break_play, run.end_play))
    }

    /// Tasks first, then handler flushes until nothing is pending.
    async fn drive(&mut self, run: &mut BatchRun<'_>, pool: &mut WorkerPool) -> ExecutorResult<()> {
        self.dispatch(run, pool, Phase::Tasks).await?;

        loop {
            let mut queued = false;
            for host in run.order.clone() {
                if !run.tracker.has_pending(&host) {
                    continue;
                }
                let pending = run.tracker.take_pending(&host);
                if !self.may_run_handlers(run, &host) {
                    debug!(host = %host, "Skipping handlers for failed host");
                    continue;
                }
                run.handler_queues.entry(host).or_default().extend(pending);
                queued = true;
            }
            if !queued || run.break_play {
                return Ok(());
            }
            self.dispatch(run, pool, Phase::Handlers).await?;
        }
    }

    fn may_run_handlers(&self, run: &BatchRun<'_>, host: &str) -> bool {
        if self.unreachable_hosts.contains(host) {
            return false;
        }
        let failed = self.failed_hosts.contains(host) || run.iterator.is_failed(host);
        !failed || run.context.force_handlers
    }

    /// Keep every host busy with at most one task until none has work left.
    async fn dispatch(&mut self, run: &mut BatchRun<'_>, pool: &mut WorkerPool, phase: Phase) -> ExecutorResult<()> {
        let forks = self.config.worker_count();
        let mut ready: VecDeque<String> = run.order.iter().cloned().collect();
        let mut in_flight = 0usize;

        loop {
            while in_flight < forks {
                let Some(host) = ready.pop_front() else {
                    break;
                };
                let Work::Task(task) = self.next_work(run, &host, phase).await? else {
                    continue;
                };
                let Some(target) = run.hosts.get(&host).cloned() else {
                    continue;
                };

                self.callback.on_task_start(&task.name, &host).await;
                let job = Job {
                    vars: self.vars_for(run, &target, &task),
                    host: target,
                    task,
                    context: Arc::clone(&run.context),
                };
                pool.jobs.send(job).await.map_err(|_| ExecutorError::ChannelClosed)?;
                in_flight += 1;
            }

            if in_flight == 0 {
                if ready.is_empty() {
                    return Ok(());
                }
                continue;
            }

            let done = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(ExecutorError::RuntimeError("run cancelled".to_string()));
                }
                done = pool.results.recv() => done.ok_or(ExecutorError::ChannelClosed)?,
            };
            in_flight -= 1;
            let host = done.host.clone();
            self.process_result(run, done).await;
            ready.push_back(host);
        }
    }

    /// The next task for a host. Handler queues come first; `meta` tasks are
    /// applied here and never returned.
    async fn next_work(&mut self, run: &mut BatchRun<'_>, host: &str, phase: Phase) -> ExecutorResult<Work> {
        loop {
            if run.break_play {
                run.iterator.set_host_complete(host);
                return Ok(Work::Done);
            }
            if let Some(handler) = run.handler_queues.get_mut(host).and_then(VecDeque::pop_front) {
                return Ok(Work::Task(handler));
            }
            if phase == Phase::Handlers {
                return Ok(Work::Done);
            }

            let Some(id) = run.iterator.get_next_task_for_host(host, false) else {
                return Ok(Work::Done);
            };
            let task = run.spec(id);
            if !task.is_meta() {
                return Ok(Work::Task(task));
            }
            self.apply_meta(run, host, &task).await;
        }
    }

    async fn apply_meta(&mut self, run: &mut BatchRun<'_>, host: &str, task: &Arc<TaskSpec>) {
        if !task.when.is_empty() {
            let Some(target) = run.hosts.get(host).cloned() else {
                return;
            };
            let vars = self.vars_for(run, &target, task);
            match self.services.evaluator.evaluate(&task.when, &vars) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    let done = JobResult {
                        host: host.to_string(),
                        task: Arc::clone(task),
                        result: TaskResult::failed(e.to_string()),
                    };
                    self.process_result(run, done).await;
                    return;
                }
            }
        }

        let directive = task.meta_directive().unwrap_or("noop").to_string();
        debug!(host = %host, directive = %directive, "Applying meta directive");
        match directive.as_str() {
            "noop" | "refresh_inventory" | "reset_connection" => {}
            "flush_handlers" => {
                let pending = run.tracker.take_pending(host);
                if !pending.is_empty() && self.may_run_handlers(run, host) {
                    run.handler_queues.entry(host.to_string()).or_default().extend(pending);
                }
            }
            "end_host" => {
                info!(host = %host, "Ending play for host");
                run.iterator.set_host_complete(host);
                run.handler_queues.remove(host);
            }
            "end_batch" => {
                info!("Ending batch");
                run.end_all();
            }
            "end_play" => {
                info!("Ending play");
                run.end_all();
                run.end_play = true;
            }
            "clear_host_errors" => {
                run.iterator.clear_host_errors(host);
                self.failed_hosts.remove(host);
            }
            "clear_facts" => {
                self.facts.remove(host);
                self.gathered.remove(host);
            }
            other => {
                let done = JobResult {
                    host: host.to_string(),
                    task: Arc::clone(task),
                    result: TaskResult::failed(format!("invalid meta action requested: {}", other)),
                };
                self.process_result(run, done).await;
            }
        }
    }

    /// The variable scope for a task on a host, lowest precedence first:
    /// inventory, play/block/task vars, facts, registered values, magic
    /// variables, extra vars.
    fn vars_for(&self, run: &BatchRun<'_>, host: &Host, task: &TaskSpec) -> Vars {
        let mut vars = host.vars.clone();
        merge_vars(&mut vars, &task.vars);
        if let Some(facts) = self.facts.get(&host.name) {
            merge_vars(&mut vars, facts);
        }
        if let Some(own) = self.host_vars.get(&host.name) {
            merge_vars(&mut vars, own);
        }

        let alive: Vec<&String> = run.play_hosts.iter().filter(|h| !self.is_dead(h)).collect();
        let batch: Vec<&String> = run.order.iter().filter(|h| !self.is_dead(h)).collect();
        let short = host.name.split('.').next().unwrap_or(&host.name);
        vars.insert("inventory_hostname".into(), json!(host.name));
        vars.insert("inventory_hostname_short".into(), json!(short));
        vars.insert("group_names".into(), json!(host.groups));
        vars.insert("ansible_play_name".into(), json!(run.plan.name));
        vars.insert("ansible_play_hosts".into(), json!(alive));
        vars.insert("ansible_play_hosts_all".into(), json!(run.play_hosts));
        vars.insert("play_hosts".into(), json!(alive));
        vars.insert("ansible_play_batch".into(), json!(batch));
        vars.insert("ansible_check_mode".into(), json!(run.context.check_mode));
        vars.insert(
            "playbook_dir".into(),
            json!(run.plan.book.base_dir().to_string_lossy()),
        );

        merge_vars(&mut vars, &run.context.extra_vars);
        vars
    }

    /// Feed a result into stats, the iterator and host variables.
    async fn process_result(&mut self, run: &mut BatchRun<'_>, done: JobResult) {
        let JobResult { host, task, mut result } = done;
        let notify = result.take_notify();

        if result.is_unreachable() {
            if task.ignore_unreachable {
                self.stats.increment(&host, StatKind::Ok);
                self.stats.increment(&host, StatKind::Ignored);
            } else {
                warn!(host = %host, task = %task.name, "Host unreachable");
                self.unreachable_hosts.insert(host.clone());
                run.iterator.set_host_complete(&host);
                run.handler_queues.remove(&host);
                run.tracker.clear(&host);
                self.stats.increment(&host, StatKind::Unreachable);
                if task.any_errors_fatal {
                    run.break_play = true;
                }
            }
        } else if result.is_failed() {
            if task.ignore_errors {
                self.stats.increment(&host, StatKind::Ok);
                self.stats.increment(&host, StatKind::Ignored);
                if result.is_changed() {
                    self.stats.increment(&host, StatKind::Changed);
                }
            } else if task.handler {
                warn!(host = %host, handler = %task.name, "Handler failed");
                self.failed_hosts.insert(host.clone());
                run.handler_queues.remove(&host);
                self.stats.increment(&host, StatKind::Failed);
            } else {
                self.record_failure(run, &host, &task, &result);
            }
        } else if result.is_skipped() {
            self.stats.increment(&host, StatKind::Skipped);
        } else {
            self.stats.increment(&host, StatKind::Ok);
            if result.is_changed() {
                self.stats.increment(&host, StatKind::Changed);
            }
        }

        if result.is_changed() && !result.is_failed() {
            for name in &notify {
                for handler in run.tracker.notify(&host, name) {
                    self.callback.on_handler_triggered(&host, &handler).await;
                }
            }
        }

        if let Some(register) = &task.register {
            self.host_vars
                .entry(host.clone())
                .or_default()
                .insert(register.clone(), result.to_json());
        }
        if !result.is_failed() && !result.is_unreachable() {
            self.record_facts(&host, &task, &result);
        }

        self.callback.on_task_result(&host, &task, &result).await;
    }

    fn record_failure(&mut self, run: &mut BatchRun<'_>, host: &str, task: &TaskSpec, result: &TaskResult) {
        run.iterator.mark_host_failed(host);
        let (state, _) = run.iterator.next_with_state(host, true);
        let rescuing = state.as_ref().map(PlayIterator::is_any_block_rescuing).unwrap_or(false);

        if rescuing {
            debug!(host = %host, task = %task.name, "Failure handed to rescue");
            self.stats.increment(host, StatKind::Rescued);
            let vars = self.host_vars.entry(host.to_string()).or_default();
            vars.insert(
                "ansible_failed_task".into(),
                json!({"name": task.name, "action": task.action}),
            );
            vars.insert("ansible_failed_result".into(), result.to_json());
            return;
        }

        warn!(host = %host, task = %task.name, msg = result.msg().unwrap_or(""), "Task failed");
        self.stats.increment(host, StatKind::Failed);
        if run.iterator.is_failed(host) {
            self.failed_hosts.insert(host.to_string());
            if !run.context.force_handlers {
                run.tracker.clear(host);
            }
        }
        if task.any_errors_fatal {
            run.break_play = true;
        }
    }

    fn record_facts(&mut self, host: &str, task: &TaskSpec, result: &TaskResult) {
        let Some(facts) = result.facts() else {
            return;
        };
        let facts: Vars = facts.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        if task.action == "set_fact" {
            merge_vars(self.host_vars.entry(host.to_string()).or_default(), &facts);
            return;
        }

        let known = self.facts.entry(host.to_string()).or_default();
        let mut nested = match known.get("ansible_facts") {
            Some(JsonValue::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for (k, v) in &facts {
            nested.insert(k.clone(), v.clone());
        }
        merge_vars(known, &facts);
        known.insert("ansible_facts".into(), JsonValue::Object(nested));

        if task.action == "setup" {
            self.gathered.insert(host.to_string());
        }
    }
}
