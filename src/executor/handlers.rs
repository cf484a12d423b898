//! Handler notification bookkeeping.
//!
//! A changed task notifies handlers by name or by `listen` topic. Notified
//! handlers wait per host until the next flush, then run in definition
//! order. A handler notified several times before a flush runs once.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use super::task::TaskSpec;

/// Pending handler runs for one play.
#[derive(Debug, Default)]
pub struct HandlerTracker {
    handlers: Vec<Arc<TaskSpec>>,
    /// Host to indices into `handlers`
    pending: HashMap<String, BTreeSet<usize>>,
}

impl HandlerTracker {
    pub fn new(handlers: Vec<Arc<TaskSpec>>) -> Self {
        Self {
            handlers,
            pending: HashMap::new(),
        }
    }

    pub fn handlers(&self) -> &[Arc<TaskSpec>] {
        &self.handlers
    }

    /// Queue every handler answering to `name` for a host. Returns the
    /// names of the handlers matched.
    pub fn notify(&mut self, host: &str, name: &str) -> Vec<String> {
        let matched: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.handler_names().any(|n| n == name))
            .map(|(index, _)| index)
            .collect();

        if matched.is_empty() {
            warn!(host = %host, handler = %name, "Notified handler not found");
            return Vec::new();
        }

        let pending = self.pending.entry(host.to_string()).or_default();
        matched
            .into_iter()
            .filter(|index| pending.insert(*index))
            .map(|index| {
                debug!(host = %host, handler = %self.handlers[index].name, "Handler notified");
                self.handlers[index].name.clone()
            })
            .collect()
    }

    pub fn has_pending(&self, host: &str) -> bool {
        self.pending.get(host).map(|p| !p.is_empty()).unwrap_or(false)
    }

    /// Remove and return a host's pending handlers in definition order.
    pub fn take_pending(&mut self, host: &str) -> Vec<Arc<TaskSpec>> {
        self.pending
            .remove(host)
            .unwrap_or_default()
            .into_iter()
            .map(|index| Arc::clone(&self.handlers[index]))
            .collect()
    }

    /// Drop everything pending for a host.
    pub fn clear(&mut self, host: &str) {
        self.pending.remove(host);
    }
}
