//! # Playengine - an async playbook execution engine
//!
//! Playengine runs YAML playbooks against an inventory of hosts. It keeps
//! Ansible's execution model: each host walks its own cursor through a
//! play's blocks (with `rescue` and `always` sections), a bounded worker
//! pool runs one task per host at a time, serial batching splits large host
//! lists, and failed tasks are retried until an `until` condition holds.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          CLI Interface                           │
//! │                   (clap-based command parsing)                   │
//! └──────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │     PlaybookExecutor  ──►  TaskQueueManager  ──►  worker pool    │
//! │        (plays)              (batches, hosts)      (TaskExecutor) │
//! └──────────────────────────────────────────────────────────────────┘
//!          │                        │                      │
//!          ▼                        ▼                      ▼
//! ┌─────────────────┐   ┌──────────────────────┐   ┌────────────────┐
//! │    Playbook     │   │     PlayIterator     │   │    Plugins     │
//! │ (entity arena,  │   │ (per-host state and  │   │ (actions and   │
//! │  field tables)  │   │  block/rescue/always)│   │  connections)  │
//! └─────────────────┘   └──────────────────────┘   └────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use playengine::prelude::*;
//!
//! # async fn run() -> playengine::error::Result<()> {
//! let catalog = ModuleCatalog::builtin();
//! let book = Arc::new(Playbook::load("site.yml", &catalog)?);
//! let inventory = Arc::new(StaticInventory::load("hosts.yml")?);
//!
//! let services = ExecutorServices::with_defaults(PluginRegistry::with_catalog(catalog));
//! let run = PlaybookExecutor::new(inventory, services)
//!     .with_config(QueueConfig::default().with_forks(10))
//!     .run(book)
//!     .await?;
//! std::process::exit(run.code.exit_code());
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::callback::{CallbackSet, DefaultCallback, LoggingCallback};
    pub use crate::config::Config;
    pub use crate::connection::{CommandResult, ConnectionError, ConnectionHandler};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{
        ExecutorError, ExecutorServices, PlayIterator, PlaybookExecutor, QueueConfig, RunCode, RunStats,
        TaskExecutor, TaskQueueManager, TaskResult, TaskSpec,
    };
    pub use crate::inventory::{Host, Inventory, StaticInventory};
    pub use crate::playbook::{EntityId, PlayContext, Playbook, Resolve};
    pub use crate::plugins::{ModuleCatalog, PluginRegistry};
    pub use crate::traits::{ActionContext, ActionHandler, ConditionalEvaluator, ExecutionCallback};
    pub use crate::vars::Vars;
}

// ============================================================================
// Core
// ============================================================================

/// Error types for load-time and configuration failures.
pub mod error;

/// Interfaces at the engine's seams: conditionals, actions, callbacks.
pub mod traits;

/// Variable scopes and merging.
pub mod vars;

// ============================================================================
// Playbook Components
// ============================================================================

/// Playbook loading into an entity arena, field tables and attribute
/// resolution, and compilation of plays into block lists.
pub mod playbook;

/// Tag filtering of task lists.
pub mod tags;

/// Jinja-compatible conditional evaluation and templating via minijinja.
pub mod template;

// ============================================================================
// Infrastructure
// ============================================================================

/// Transports that run commands on hosts.
pub mod connection;

/// Hosts, groups and host pattern selection.
pub mod inventory;

/// Action and connection plugins, the module catalog and the payload cache.
pub mod plugins;

/// Play iteration, the task queue manager and the task executor.
pub mod executor;

/// Configuration files and environment overrides.
pub mod config;

/// Progress reporting.
pub mod callback;

/// Command-line interface.
pub mod cli;

/// Returns the current version of Playengine.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
