//! Process-wide cache of module payloads.
//!
//! Workers ask for the same module concurrently; the first reader loads the
//! file and later readers share the loaded payload. Two workers racing on a
//! cold entry may both read the file, but only one payload is kept.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::executor::{ExecutorError, ExecutorResult};

/// A module file ready to ship to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPayload {
    pub name: String,
    pub path: PathBuf,
    pub source: String,
}

impl ActionPayload {
    /// Whether the payload names its own interpreter.
    pub fn has_shebang(&self) -> bool {
        self.source.starts_with("#!")
    }
}

/// Concurrent map from module name to loaded payload.
#[derive(Debug, Default)]
pub struct ActionCache {
    entries: DashMap<String, Arc<ActionPayload>>,
    loads: AtomicUsize,
}

impl ActionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ActionPayload>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// The cached payload for `name`, reading `path` on first use.
    pub async fn get_or_load(&self, name: &str, path: &Path) -> ExecutorResult<Arc<ActionPayload>> {
        if let Some(payload) = self.get(name) {
            trace!(module = %name, "Module payload cache hit");
            return Ok(payload);
        }

        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            ExecutorError::RuntimeError(format!("could not read module '{}' from {}: {}", name, path.display(), e))
        })?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        trace!(module = %name, path = %path.display(), "Loaded module payload");

        let payload = Arc::new(ActionPayload {
            name: name.to_string(),
            path: path.to_path_buf(),
            source,
        });
        let entry = self.entries.entry(name.to_string()).or_insert(payload);
        Ok(Arc::clone(entry.value()))
    }

    /// Number of file reads performed.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
