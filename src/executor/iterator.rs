//! Per-host play traversal.
//!
//! [`PlayIterator`] keeps one [`HostState`] per host: a cursor into the
//! play's compiled blocks plus the state of whichever nested block is live.
//! Asking for the next task walks the block/rescue/always state machine until
//! a task comes out or the host is complete.
//!
//! States are plain values. A `peek` works on a copy and throws it away, so
//! looking ahead never changes what the host runs next.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::playbook::compile::compile_play;
use crate::playbook::{CompiledBlock, CompiledItem, EntityId, PlayContext, Playbook, Resolve};

/// Where a host is within its current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunState {
    Setup,
    Tasks,
    Rescue,
    Always,
    Complete,
}

/// Bit set of the sections that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FailState(u8);

impl FailState {
    pub const NONE: FailState = FailState(0);
    pub const SETUP: FailState = FailState(1);
    pub const TASKS: FailState = FailState(2);
    pub const RESCUE: FailState = FailState(4);
    pub const ALWAYS: FailState = FailState(8);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: FailState) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FailState {
    type Output = FailState;

    fn bitor(self, rhs: FailState) -> FailState {
        FailState(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FailState {
    fn bitor_assign(&mut self, rhs: FailState) {
        self.0 |= rhs.0;
    }
}

/// When the synthetic setup task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatheringPolicy {
    /// Gather unless the play sets `gather_facts: false`
    #[default]
    Implicit,
    /// Gather only when the play sets `gather_facts: true`
    Explicit,
    /// Like implicit, but skip hosts that already have facts
    Smart,
}

impl FromStr for GatheringPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" => Ok(GatheringPolicy::Implicit),
            "explicit" => Ok(GatheringPolicy::Explicit),
            "smart" => Ok(GatheringPolicy::Smart),
            other => Err(format!("unknown gathering policy '{}'", other)),
        }
    }
}

impl fmt::Display for GatheringPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GatheringPolicy::Implicit => "implicit",
            GatheringPolicy::Explicit => "explicit",
            GatheringPolicy::Smart => "smart",
        };
        f.write_str(name)
    }
}

/// A host's cursor into a play.
#[derive(Debug, Clone)]
pub struct HostState {
    blocks: Arc<[Arc<CompiledBlock>]>,
    cur_block: usize,
    cur_regular_task: usize,
    cur_rescue_task: usize,
    cur_always_task: usize,
    run_state: RunState,
    fail_state: FailState,
    pending_setup: bool,
    /// State of the nested block live in the current section
    child: Option<Box<HostState>>,
    did_rescue: bool,
    did_start_at_task: bool,
}

impl HostState {
    pub fn new(blocks: Arc<[Arc<CompiledBlock>]>) -> Self {
        Self {
            blocks,
            cur_block: 0,
            cur_regular_task: 0,
            cur_rescue_task: 0,
            cur_always_task: 0,
            run_state: RunState::Setup,
            fail_state: FailState::NONE,
            pending_setup: false,
            child: None,
            did_rescue: false,
            did_start_at_task: false,
        }
    }

    fn for_child(block: Arc<CompiledBlock>) -> Self {
        let mut state = Self::new(Arc::from(vec![block]));
        state.run_state = RunState::Tasks;
        state
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn fail_state(&self) -> FailState {
        self.fail_state
    }

    pub fn cur_block(&self) -> usize {
        self.cur_block
    }

    pub fn did_rescue(&self) -> bool {
        self.did_rescue
    }

    pub fn pending_setup(&self) -> bool {
        self.pending_setup
    }

    pub fn child(&self) -> Option<&HostState> {
        self.child.as_deref()
    }

    /// The block the cursor is in, if any remain.
    pub fn current_block(&self) -> Option<&Arc<CompiledBlock>> {
        self.blocks.get(self.cur_block)
    }

    /// The deepest live state.
    pub fn active_state(&self) -> &HostState {
        match &self.child {
            Some(child) => child.active_state(),
            None => self,
        }
    }

    fn reset_cursors(&mut self) {
        self.cur_regular_task = 0;
        self.cur_rescue_task = 0;
        self.cur_always_task = 0;
        self.child = None;
    }

    fn has_rescue(&self) -> bool {
        self.current_block().map(|b| !b.rescue.is_empty()).unwrap_or(false)
    }

    fn has_always(&self) -> bool {
        self.current_block().map(|b| !b.always.is_empty()).unwrap_or(false)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HOST STATE: block={}, task={}, rescue={}, always={}, run_state={:?}, fail_state={}, pending_setup={}, did_rescue={}, child={}",
            self.cur_block,
            self.cur_regular_task,
            self.cur_rescue_task,
            self.cur_always_task,
            self.run_state,
            self.fail_state.bits(),
            self.pending_setup,
            self.did_rescue,
            self.child.as_ref().map(|c| c.to_string()).unwrap_or_else(|| "None".into()),
        )
    }
}

/// Which section list a cursor walks.
#[derive(Clone, Copy)]
enum Section {
    Tasks,
    Rescue,
    Always,
}

enum ChildStep {
    /// No live child; walk the section's own list
    NoChild,
    /// The child produced a task, or failed while producing one
    Yielded(Option<EntityId>),
    /// The child finished or failed; look again
    Continue,
}

/// Drives every host of one play through its compiled blocks.
#[derive(Debug)]
pub struct PlayIterator {
    blocks: Arc<[Arc<CompiledBlock>]>,
    host_states: HashMap<String, HostState>,
    removed_hosts: HashSet<String>,
    gathering: GatheringPolicy,
    gather_facts: Option<bool>,
    /// Hosts that already have facts, consulted by the smart policy
    gathered: HashSet<String>,
}

impl PlayIterator {
    /// An iterator over precompiled blocks. Block 0 must be the setup block.
    pub fn new(blocks: Vec<Arc<CompiledBlock>>, hosts: &[String]) -> Self {
        let blocks: Arc<[Arc<CompiledBlock>]> = Arc::from(blocks);
        let host_states = hosts
            .iter()
            .map(|h| (h.clone(), HostState::new(Arc::clone(&blocks))))
            .collect();
        Self {
            blocks,
            host_states,
            removed_hosts: HashSet::new(),
            gathering: GatheringPolicy::default(),
            gather_facts: None,
            gathered: HashSet::new(),
        }
    }

    pub fn with_gathering(mut self, policy: GatheringPolicy, gather_facts: Option<bool>) -> Self {
        self.gathering = policy;
        self.gather_facts = gather_facts;
        self
    }

    pub fn with_gathered(mut self, gathered: HashSet<String>) -> Self {
        self.gathered = gathered;
        self
    }

    /// Compile a play for a set of hosts, honoring the context's tag filter
    /// and `start_at_task`.
    pub fn for_play(
        book: &Playbook,
        play: EntityId,
        hosts: &[String],
        ctx: &PlayContext,
        policy: GatheringPolicy,
        gathered: HashSet<String>,
    ) -> Self {
        let blocks = compile_play(book, play, &ctx.tag_filter());
        let gather_facts = book.entity_ref(play).get_opt_bool("gather_facts");
        let mut iterator = Self::new(blocks, hosts)
            .with_gathering(policy, gather_facts)
            .with_gathered(gathered);

        if let Some(start_at) = &ctx.start_at_task {
            iterator.start_at_task(hosts, |task| book.name(task), start_at);
        }
        iterator
    }

    /// Fast-forward each host to the first task whose name matches `pattern`.
    fn start_at_task<F>(&mut self, hosts: &[String], name_of: F, pattern: &str)
    where
        F: Fn(EntityId) -> String,
    {
        let glob = glob::Pattern::new(pattern).ok();
        let matches = |name: &str| name == pattern || glob.as_ref().map(|g| g.matches(name)).unwrap_or(false);

        for host in hosts {
            let mut matched = false;
            loop {
                let Some(task) = self.get_next_task_for_host(host, true) else {
                    break;
                };
                if matches(&name_of(task)) {
                    matched = true;
                    break;
                }
                self.get_next_task_for_host(host, false);
            }
            if matched {
                if let Some(state) = self.host_states.get_mut(host) {
                    state.did_start_at_task = true;
                    state.run_state = RunState::Setup;
                }
            } else {
                debug!(host = %host, pattern = %pattern, "No task matched the start point");
                if let Some(state) = self.host_states.get_mut(host) {
                    state.run_state = RunState::Complete;
                }
            }
        }
    }

    pub fn blocks(&self) -> &[Arc<CompiledBlock>] {
        &self.blocks
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.host_states.keys().map(String::as_str)
    }

    /// A copy of a host's state.
    pub fn get_host_state(&self, host: &str) -> Option<HostState> {
        self.host_states.get(host).cloned()
    }

    /// Hosts dropped from the play by a failure they have not rescued.
    pub fn removed_hosts(&self) -> &HashSet<String> {
        &self.removed_hosts
    }

    /// The next task for a host, or `None` once the host is complete.
    ///
    /// With `peek`, the walk runs on a copy that is discarded.
    pub fn get_next_task_for_host(&mut self, host: &str, peek: bool) -> Option<EntityId> {
        self.next_with_state(host, peek).1
    }

    /// Like [`get_next_task_for_host`](Self::get_next_task_for_host), also
    /// returning the state reached.
    pub fn next_with_state(&mut self, host: &str, peek: bool) -> (Option<HostState>, Option<EntityId>) {
        let Some(state) = self.host_states.get(host).cloned() else {
            return (None, None);
        };
        if state.run_state == RunState::Complete {
            return (Some(state), None);
        }

        let (state, task) = self.next_task_from_state(state, host, peek);
        trace!(host = %host, peek, task = ?task, state = %state, "Next task");
        if !peek {
            self.host_states.insert(host.to_string(), state.clone());
        }
        (Some(state), task)
    }

    fn setup_wanted(&self, host: &str) -> bool {
        let implied = self.gather_facts.unwrap_or(true);
        match self.gathering {
            GatheringPolicy::Implicit => implied,
            GatheringPolicy::Explicit => self.gather_facts == Some(true),
            GatheringPolicy::Smart => implied && !self.gathered.contains(host),
        }
    }

    fn next_task_from_state(&mut self, mut state: HostState, host: &str, peek: bool) -> (HostState, Option<EntityId>) {
        loop {
            let Some(block) = state.current_block().cloned() else {
                state.run_state = RunState::Complete;
                return (state, None);
            };

            let task = match state.run_state {
                RunState::Setup => {
                    if !state.pending_setup {
                        state.pending_setup = true;
                        if self.setup_wanted(host) {
                            self.blocks.first().and_then(|setup| setup.first_task())
                        } else {
                            None
                        }
                    } else {
                        state.pending_setup = false;
                        state.run_state = RunState::Tasks;
                        if !state.did_start_at_task {
                            state.cur_block += 1;
                            state.reset_cursors();
                        }
                        None
                    }
                }
                RunState::Tasks => {
                    state.pending_setup = false;
                    match self.step_child(&mut state, host, peek) {
                        ChildStep::Yielded(task) => task,
                        ChildStep::Continue => continue,
                        ChildStep::NoChild => {
                            if Self::check_failed_state(&state) {
                                state.run_state = RunState::Rescue;
                                None
                            } else if state.cur_regular_task >= block.block.len() {
                                state.run_state = RunState::Always;
                                None
                            } else {
                                Self::take_item(&mut state, &block, Section::Tasks)
                            }
                        }
                    }
                }
                RunState::Rescue => {
                    if !peek {
                        self.removed_hosts.remove(host);
                    }
                    match self.step_child(&mut state, host, peek) {
                        ChildStep::Yielded(task) => task,
                        ChildStep::Continue => continue,
                        ChildStep::NoChild => {
                            if state.fail_state.contains(FailState::RESCUE) {
                                state.run_state = RunState::Always;
                                None
                            } else if state.cur_rescue_task >= block.rescue.len() {
                                if !block.rescue.is_empty() {
                                    state.fail_state = FailState::NONE;
                                    state.did_rescue = true;
                                }
                                state.run_state = RunState::Always;
                                None
                            } else {
                                Self::take_item(&mut state, &block, Section::Rescue)
                            }
                        }
                    }
                }
                RunState::Always => match self.step_child(&mut state, host, peek) {
                    ChildStep::Yielded(task) => task,
                    ChildStep::Continue => continue,
                    ChildStep::NoChild => {
                        if state.cur_always_task >= block.always.len() {
                            if !state.fail_state.is_none() {
                                state.run_state = RunState::Complete;
                            } else {
                                state.cur_block += 1;
                                state.reset_cursors();
                                state.run_state = RunState::Tasks;
                                state.did_rescue = false;
                            }
                            None
                        } else {
                            Self::take_item(&mut state, &block, Section::Always)
                        }
                    }
                },
                RunState::Complete => return (state, None),
            };

            if task.is_some() {
                return (state, task);
            }
        }
    }

    /// Advance the live child state, if there is one.
    fn step_child(&mut self, state: &mut HostState, host: &str, peek: bool) -> ChildStep {
        let Some(child) = state.child.take() else {
            return ChildStep::NoChild;
        };
        let (child, task) = self.next_task_from_state(*child, host, peek);
        if Self::check_failed_state(&child) {
            Self::set_failed_state(state);
            return match task {
                Some(task) => ChildStep::Yielded(Some(task)),
                None => ChildStep::Continue,
            };
        }
        if task.is_none() || child.run_state == RunState::Complete {
            return ChildStep::Continue;
        }
        state.child = Some(Box::new(child));
        ChildStep::Yielded(task)
    }

    /// Take the item under the section cursor: a task is yielded, a nested
    /// block becomes the live child and yields nothing this pass.
    fn take_item(state: &mut HostState, block: &CompiledBlock, section: Section) -> Option<EntityId> {
        let (items, cursor) = match section {
            Section::Tasks => (&block.block, &mut state.cur_regular_task),
            Section::Rescue => (&block.rescue, &mut state.cur_rescue_task),
            Section::Always => (&block.always, &mut state.cur_always_task),
        };
        let item = items.get(*cursor).cloned();
        *cursor += 1;
        match item {
            Some(CompiledItem::Task(id)) => Some(id),
            Some(CompiledItem::Block(child)) => {
                state.child = Some(Box::new(HostState::for_child(child)));
                None
            }
            None => None,
        }
    }

    /// Record a failure in the innermost live state and move it to the
    /// section that handles the failure.
    pub fn set_failed_state(state: &mut HostState) {
        match state.run_state {
            RunState::Setup => {
                state.fail_state |= FailState::SETUP;
                state.run_state = RunState::Complete;
            }
            RunState::Tasks => {
                if let Some(child) = state.child.as_mut() {
                    Self::set_failed_state(child);
                } else {
                    state.fail_state |= FailState::TASKS;
                    state.run_state = if state.has_rescue() {
                        RunState::Rescue
                    } else if state.has_always() {
                        RunState::Always
                    } else {
                        RunState::Complete
                    };
                }
            }
            RunState::Rescue => {
                if let Some(child) = state.child.as_mut() {
                    Self::set_failed_state(child);
                } else {
                    state.fail_state |= FailState::RESCUE;
                    state.run_state = if state.has_always() {
                        RunState::Always
                    } else {
                        RunState::Complete
                    };
                }
            }
            RunState::Always => {
                if let Some(child) = state.child.as_mut() {
                    Self::set_failed_state(child);
                } else {
                    state.fail_state |= FailState::ALWAYS;
                    state.run_state = RunState::Complete;
                }
            }
            RunState::Complete => {}
        }
    }

    /// Whether a state carries a failure that has not been handled.
    pub fn check_failed_state(state: &HostState) -> bool {
        let child_failed = state.child.as_deref().map(Self::check_failed_state).unwrap_or(false);

        match state.run_state {
            RunState::Rescue | RunState::Always if child_failed => return true,
            _ => {}
        }

        if !state.fail_state.is_none() {
            return match state.run_state {
                RunState::Rescue if !state.fail_state.contains(FailState::RESCUE) => false,
                RunState::Always if !state.fail_state.contains(FailState::ALWAYS) => false,
                _ => !(state.did_rescue && !state.fail_state.contains(FailState::ALWAYS)),
            };
        }

        if state.run_state == RunState::Tasks && child_failed {
            return !(state.has_rescue() && !state.fail_state.contains(FailState::RESCUE));
        }
        false
    }

    /// Whether the state, or any live nested state, is in a rescue section.
    pub fn is_any_block_rescuing(state: &HostState) -> bool {
        if state.run_state == RunState::Rescue {
            return true;
        }
        state.child.as_deref().map(Self::is_any_block_rescuing).unwrap_or(false)
    }

    /// Record a task failure for a host.
    pub fn mark_host_failed(&mut self, host: &str) {
        if let Some(state) = self.host_states.get_mut(host) {
            Self::set_failed_state(state);
            debug!(host = %host, state = %state, "Marked host failed");
        }
        self.removed_hosts.insert(host.to_string());
    }

    /// Whether a host has an unhandled failure.
    pub fn is_failed(&self, host: &str) -> bool {
        self.host_states
            .get(host)
            .map(Self::check_failed_state)
            .unwrap_or(false)
    }

    /// Stop iterating a host.
    pub fn set_host_complete(&mut self, host: &str) {
        if let Some(state) = self.host_states.get_mut(host) {
            state.run_state = RunState::Complete;
        }
    }

    /// Forget every failure recorded for a host.
    pub fn clear_host_errors(&mut self, host: &str) {
        fn clear(state: &mut HostState) {
            state.fail_state = FailState::NONE;
            if let Some(child) = state.child.as_mut() {
                clear(child);
            }
        }
        if let Some(state) = self.host_states.get_mut(host) {
            clear(state);
        }
        self.removed_hosts.remove(host);
    }

    /// Whether every host is complete.
    pub fn is_complete(&self) -> bool {
        self.host_states.values().all(|s| s.run_state == RunState::Complete)
    }
}
