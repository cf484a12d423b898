//! Module catalog: the action names a task may use.
//!
//! The catalog holds the built-in actions plus every module file found
//! under the configured module paths. A module is named after its file
//! stem, so `library/net/check_port.py` provides `check_port`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Actions implemented in-process.
pub const BUILTIN_ACTIONS: &[&str] = &[
    "assert",
    "command",
    "debug",
    "fail",
    "import_tasks",
    "include",
    "include_tasks",
    "include_vars",
    "meta",
    "ping",
    "raw",
    "set_fact",
    "setup",
    "shell",
];

/// Collection prefixes that name the built-in namespace.
const BUILTIN_PREFIXES: &[&str] = &["ansible.builtin.", "ansible.legacy."];

/// Known action names and the files backing external modules.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: BTreeMap<String, PathBuf>,
}

impl ModuleCatalog {
    /// Only the built-in actions.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Built-ins plus every module file under `paths`.
    ///
    /// Missing directories are skipped with a warning. When two files share
    /// a stem the first path listed wins.
    pub fn discover<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut catalog = Self::builtin();
        for root in paths {
            let root = root.as_ref();
            if !root.is_dir() {
                warn!(path = %root.display(), "Module path does not exist");
                continue;
            }
            for entry in WalkDir::new(root)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if stem.starts_with('.') || stem.starts_with('_') {
                    continue;
                }
                catalog.add_module(stem, entry.path());
            }
        }
        debug!(modules = catalog.modules.len(), "Module discovery complete");
        catalog
    }

    /// Register a module file. An existing entry is kept.
    pub fn add_module(&mut self, name: &str, path: impl Into<PathBuf>) {
        self.modules.entry(name.to_string()).or_insert_with(|| path.into());
    }

    /// Strip built-in collection prefixes from an action name.
    pub fn canonical_name<'n>(&self, name: &'n str) -> &'n str {
        BUILTIN_PREFIXES
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix))
            .unwrap_or(name)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        BUILTIN_ACTIONS.contains(&self.canonical_name(name))
    }

    /// Whether `name` is a known action.
    pub fn contains(&self, name: &str) -> bool {
        let name = self.canonical_name(name);
        BUILTIN_ACTIONS.contains(&name) || self.modules.contains_key(name)
    }

    /// The file backing an external module.
    pub fn module_path(&self, name: &str) -> Option<&Path> {
        self.modules.get(self.canonical_name(name)).map(PathBuf::as_path)
    }

    /// Names of discovered external modules.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        BUILTIN_ACTIONS.len() + self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let catalog = ModuleCatalog::builtin();
        assert!(catalog.contains("command"));
        assert!(catalog.contains("ansible.builtin.command"));
        assert!(catalog.contains("ansible.legacy.debug"));
        assert!(!catalog.contains("copy"));
        assert!(!catalog.contains("community.general.ufw"));
        assert_eq!(catalog.canonical_name("ansible.builtin.shell"), "shell");
    }

    #[test]
    fn test_discover_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("net")).unwrap();
        std::fs::write(dir.path().join("net/check_port.py"), "#!/usr/bin/python\n").unwrap();
        std::fs::write(dir.path().join("hello"), "#!/bin/sh\necho '{}'\n").unwrap();
        std::fs::write(dir.path().join("_private.sh"), "").unwrap();

        let catalog = ModuleCatalog::discover(&[dir.path(), Path::new("/definitely/missing")]);
        assert!(catalog.contains("check_port"));
        assert!(catalog.contains("hello"));
        assert!(!catalog.contains("_private"));
        assert_eq!(
            catalog.module_path("check_port"),
            Some(dir.path().join("net/check_port.py").as_path())
        );
        assert!(!catalog.is_builtin("hello"));
    }
}
