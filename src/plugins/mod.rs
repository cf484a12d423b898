//! Plugin registry for Playengine
//!
//! Plugins are looked up by name when a task runs:
//!
//! - **Actions** ([`ActionHandler`]): registered per action name. A task
//!   whose action has no handler runs through the `normal` action, which
//!   ships a module from the [`ModuleCatalog`] to the host.
//! - **Connections** ([`ConnectionHandler`] factories): one new transport
//!   per task invocation, keyed by connection type.
//!
//! # Custom actions
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use playengine::executor::{ExecutorResult, TaskResult};
//! use playengine::plugins::PluginRegistry;
//! use playengine::traits::{ActionContext, ActionHandler};
//! use playengine::vars::Vars;
//! use std::sync::Arc;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl ActionHandler for Hello {
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     async fn run(&self, _ctx: &ActionContext<'_>, _vars: &Vars) -> ExecutorResult<TaskResult> {
//!         Ok(TaskResult::ok())
//!     }
//! }
//!
//! let mut registry = PluginRegistry::with_builtins();
//! registry.register_action(Arc::new(Hello));
//! ```

pub mod action;
pub mod cache;
pub mod catalog;

pub use cache::{ActionCache, ActionPayload};
pub use catalog::ModuleCatalog;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::connection::{ConnectionHandler, SshConnection};
use crate::executor::{ExecutorError, ExecutorResult};
use crate::traits::ActionHandler;

/// Where a connection should point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Address to connect to
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// Connect timeout in seconds
    pub timeout: u64,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            timeout: 10,
        }
    }
}

/// Builds a fresh, unconnected transport.
pub type ConnectionFactory = Arc<dyn Fn(&ConnectionTarget) -> Box<dyn ConnectionHandler> + Send + Sync>;

/// Registered actions, connection types and the module catalog.
#[derive(Clone)]
pub struct PluginRegistry {
    actions: HashMap<String, Arc<dyn ActionHandler>>,
    connections: HashMap<String, ConnectionFactory>,
    catalog: ModuleCatalog,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new(catalog: ModuleCatalog) -> Self {
        Self {
            actions: HashMap::new(),
            connections: HashMap::new(),
            catalog,
        }
    }

    /// Create a registry with every built-in action and transport
    pub fn with_builtins() -> Self {
        Self::with_catalog(ModuleCatalog::builtin())
    }

    /// Built-in plugins over a custom catalog.
    pub fn with_catalog(catalog: ModuleCatalog) -> Self {
        let mut registry = Self::new(catalog);
        for handler in action::builtin_actions() {
            registry.register_action(handler);
        }

        #[cfg(feature = "local")]
        registry.register_connection(
            "local",
            Arc::new(|_: &ConnectionTarget| {
                Box::new(crate::connection::LocalConnection::new()) as Box<dyn ConnectionHandler>
            }),
        );
        registry.register_connection(
            "ssh",
            Arc::new(|target: &ConnectionTarget| {
                Box::new(
                    SshConnection::new(target.host.clone())
                        .with_port(target.port)
                        .with_user(target.user.clone())
                        .with_timeout(target.timeout),
                ) as Box<dyn ConnectionHandler>
            }),
        );
        registry
    }

    /// Register an action under its own name, replacing any previous one.
    pub fn register_action(&mut self, handler: Arc<dyn ActionHandler>) {
        self.actions.insert(handler.name().to_string(), handler);
    }

    pub fn register_connection(&mut self, name: impl Into<String>, factory: ConnectionFactory) {
        self.connections.insert(name.into(), factory);
    }

    /// The handler registered for an action, if any.
    pub fn action(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions
            .get(name)
            .or_else(|| self.actions.get(self.catalog.canonical_name(name)))
            .cloned()
    }

    /// A new transport of the given type.
    pub fn connection(&self, name: &str, target: &ConnectionTarget) -> ExecutorResult<Box<dyn ConnectionHandler>> {
        self.connections
            .get(name)
            .map(|factory| factory(target))
            .ok_or_else(|| ExecutorError::ConnectionNotFound(name.to_string()))
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Names of the registered actions, sorted.
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut connections: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        connections.sort_unstable();
        f.debug_struct("PluginRegistry")
            .field("actions", &self.action_names())
            .field("connections", &connections)
            .field("catalog", &self.catalog)
            .finish()
    }
}
