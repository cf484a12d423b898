//! Inventory: the hosts a playbook can target.
//!
//! The engine only needs [`Inventory::get_hosts`]; host pattern selection is
//! built on top of it from each host's group membership. [`StaticInventory`]
//! reads the YAML inventory layout:
//!
//! ```yaml
//! all:
//!   vars: { ntp: pool.example.org }
//!   hosts:
//!     bastion:
//!   children:
//!     web:
//!       hosts:
//!         web1: { ansible_host: 10.0.0.5 }
//!         web2:
//! ```
//!
//! # Patterns
//!
//! - `all` or `*` - every host
//! - `web1`, `web` - a host or a group
//! - `web*` - glob on host names
//! - `~web\d+` - regex on host names
//! - `web:db` or `web,db` - union
//! - `web:&staging` - intersection
//! - `web:!web2` - exclusion

pub mod host;

pub use host::Host;

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::vars::{merge_vars, vars_from_json, yaml_to_json, Vars};

/// Source of the hosts a run can target.
pub trait Inventory: Send + Sync {
    /// Every host, in inventory order.
    fn get_hosts(&self) -> Vec<Host>;

    /// Look up one host by name.
    fn get_host(&self, name: &str) -> Result<Host> {
        self.get_hosts()
            .into_iter()
            .find(|h| h.name == name)
            .ok_or_else(|| Error::HostNotFound(name.to_string()))
    }

    /// Hosts matching a list of patterns, in inventory order.
    ///
    /// Patterns in the list are combined the same way as `:` separated
    /// parts of a single pattern.
    fn select(&self, patterns: &[String]) -> Result<Vec<Host>> {
        let hosts = self.get_hosts();
        let joined = patterns.join(":");
        let names = select_names(&hosts, &joined)?;

        let mut selected: Vec<Host> = hosts.into_iter().filter(|h| names.contains(&h.name)).collect();
        // `localhost` is always addressable, even when not listed
        if names.contains("localhost") && !selected.iter().any(|h| h.name == "localhost") {
            selected.push(implicit_localhost());
        }
        Ok(selected)
    }
}

/// The control node, reachable without an inventory entry.
pub fn implicit_localhost() -> Host {
    Host::new("localhost").with_var("ansible_connection", JsonValue::String("local".into()))
}

fn select_names(hosts: &[Host], pattern: &str) -> Result<HashSet<String>> {
    let mut result: HashSet<String> = HashSet::new();
    let mut first = true;

    for part in split_pattern(pattern) {
        if let Some(sub) = part.strip_prefix('&') {
            let matched = match_part(hosts, sub)?;
            if first {
                result = matched;
            } else {
                result.retain(|name| matched.contains(name));
            }
        } else if let Some(sub) = part.strip_prefix('!') {
            let matched = match_part(hosts, sub)?;
            result.retain(|name| !matched.contains(name));
        } else {
            result.extend(match_part(hosts, &part)?);
        }
        first = false;
    }
    Ok(result)
}

/// Split on `:` and `,`, ignoring separators inside brackets.
fn split_pattern(pattern: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in pattern.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ':' | ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn match_part(hosts: &[Host], part: &str) -> Result<HashSet<String>> {
    let part = part.trim();
    if part == "all" || part == "*" {
        return Ok(hosts.iter().map(|h| h.name.clone()).collect());
    }

    if let Some(expr) = part.strip_prefix('~') {
        let regex = Regex::new(expr).map_err(|e| Error::InvalidPattern(format!("{}: {}", part, e)))?;
        return Ok(hosts
            .iter()
            .filter(|h| regex.is_match(&h.name))
            .map(|h| h.name.clone())
            .collect());
    }

    if part.contains(['*', '?', '[']) {
        let glob = glob::Pattern::new(part).map_err(|e| Error::InvalidPattern(format!("{}: {}", part, e)))?;
        return Ok(hosts
            .iter()
            .filter(|h| glob.matches(&h.name) || h.groups.iter().any(|g| glob.matches(g)))
            .map(|h| h.name.clone())
            .collect());
    }

    let matched: HashSet<String> = hosts
        .iter()
        .filter(|h| h.name == part || h.in_group(part))
        .map(|h| h.name.clone())
        .collect();
    if matched.is_empty() {
        if part == "localhost" {
            return Ok(HashSet::from(["localhost".to_string()]));
        }
        warn!(pattern = %part, "Could not match supplied host pattern, ignoring");
    }
    Ok(matched)
}

// ============================================================================
// Static inventory
// ============================================================================

#[derive(Debug, Default)]
struct HostEntry {
    vars: Vars,
    /// Groups with their nesting depth, in discovery order
    groups: Vec<(String, usize)>,
}

/// An inventory read once from YAML or built from a list of names.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    hosts: Vec<Host>,
    source: Option<String>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory of ungrouped hosts.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: names
                .into_iter()
                .map(|n| Host::new(n).with_group("ungrouped"))
                .collect(),
            source: None,
        }
    }

    /// Build an inventory from prepared hosts.
    pub fn from_hosts(hosts: Vec<Host>) -> Self {
        Self { hosts, source: None }
    }

    /// Load a YAML inventory file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::InventoryLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut inventory = Self::from_yaml_str(&content).map_err(|e| match e {
            Error::InventoryLoad { message, .. } => Error::InventoryLoad {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        inventory.source = Some(path.display().to_string());
        debug!(path = %path.display(), hosts = inventory.hosts.len(), "Loaded inventory");
        Ok(inventory)
    }

    /// Parse the YAML inventory layout.
    ///
    /// A plain list of host names is accepted too.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| load_error(e.to_string()))?;
        match yaml_to_json(&yaml) {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Array(items) => Ok(Self::from_names(
                items.iter().map(crate::playbook::attribute::json_to_plain_string),
            )),
            JsonValue::Object(groups) => {
                let mut entries: IndexMap<String, HostEntry> = IndexMap::new();
                let mut stack = Vec::new();
                for (name, def) in &groups {
                    parse_group(name, def, &mut stack, &mut entries)?;
                }
                Ok(Self::from_entries(entries))
            }
            _ => Err(load_error("inventory must be a mapping of groups or a list of hosts")),
        }
    }

    fn from_entries(entries: IndexMap<String, HostEntry>) -> Self {
        let hosts = entries
            .into_iter()
            .map(|(name, entry)| {
                let mut host = Host::new(name);
                let mut groups = entry.groups;
                groups.sort_by_key(|(_, depth)| *depth);
                for (group, _) in groups {
                    host = host.with_group(group);
                }
                if host.groups.len() == 1 {
                    host = host.with_group("ungrouped");
                }
                host.vars = entry.vars;
                host
            })
            .collect();
        Self { hosts, source: None }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl Inventory for StaticInventory {
    fn get_hosts(&self) -> Vec<Host> {
        self.hosts.clone()
    }
}

fn load_error(message: impl Into<String>) -> Error {
    Error::InventoryLoad {
        path: Default::default(),
        message: message.into(),
    }
}

/// Walk one group definition. Group vars are layered so that deeper groups
/// win over their ancestors and host vars win over every group.
fn parse_group(
    name: &str,
    def: &JsonValue,
    stack: &mut Vec<(String, Vars)>,
    entries: &mut IndexMap<String, HostEntry>,
) -> Result<()> {
    if stack.iter().any(|(g, _)| g == name) {
        return Err(load_error(format!("circular group dependency at '{}'", name)));
    }
    let def = match def {
        JsonValue::Null => return Ok(()),
        JsonValue::Object(def) => def,
        _ => return Err(load_error(format!("group '{}' must be a mapping", name))),
    };
    for key in def.keys() {
        if !matches!(key.as_str(), "hosts" | "vars" | "children") {
            return Err(load_error(format!("unknown key '{}' in group '{}'", key, name)));
        }
    }

    let group_vars = def.get("vars").map(vars_from_json).unwrap_or_default();
    stack.push((name.to_string(), group_vars));

    let hosts: Vec<(String, Vars)> = match def.get("hosts") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Object(hosts)) => hosts
            .iter()
            .map(|(h, v)| (h.clone(), vars_from_json(v)))
            .collect(),
        Some(JsonValue::Array(hosts)) => hosts
            .iter()
            .map(|h| (crate::playbook::attribute::json_to_plain_string(h), Vars::new()))
            .collect(),
        Some(_) => return Err(load_error(format!("hosts of group '{}' must be a mapping", name))),
    };

    for (host, own) in hosts {
        let entry = entries.entry(host).or_default();
        let mut vars = Vars::new();
        for (_, layer) in stack.iter() {
            merge_vars(&mut vars, layer);
        }
        merge_vars(&mut vars, &entry.vars);
        merge_vars(&mut vars, &own);
        entry.vars = vars;
        for (offset, (group, _)) in stack.iter().enumerate() {
            if !entry.groups.iter().any(|(g, _)| g == group) {
                entry.groups.push((group.clone(), offset));
            }
        }
    }

    match def.get("children") {
        None | Some(JsonValue::Null) => {}
        Some(JsonValue::Object(children)) => {
            for (child, child_def) in children {
                parse_group(child, child_def, stack, entries)?;
            }
        }
        Some(_) => {
            return Err(load_error(format!("children of group '{}' must be a mapping", name)));
        }
    }

    stack.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INVENTORY: &str = r#"
all:
  vars:
    ntp: pool
    tier: base
  hosts:
    bastion:
  children:
    web:
      vars:
        tier: web
      hosts:
        web1:
          ansible_host: 10.0.0.5
        web2:
          tier: special
    db:
      hosts:
        db1:
    staging:
      hosts:
        web2:
        db1:
"#;

    fn names(hosts: &[Host]) -> Vec<&str> {
        hosts.iter().map(|h| h.name.as_str()).collect()
    }

    fn select(inv: &StaticInventory, pattern: &str) -> Vec<String> {
        inv.select(&[pattern.to_string()])
            .unwrap()
            .into_iter()
            .map(|h| h.name)
            .collect()
    }

    #[test]
    fn test_hosts_in_inventory_order() {
        let inv = StaticInventory::from_yaml_str(INVENTORY).unwrap();
        assert_eq!(names(&inv.get_hosts()), vec!["bastion", "web1", "web2", "db1"]);
    }

    #[test]
    fn test_unsorted_hosts_keep_file_order_through_batching() {
        use crate::executor::{get_serialized_batches, SerialSize};

        let inv = StaticInventory::from_yaml_str("all:\n  hosts:\n    zeta:\n    mid:\n    alpha:\n").unwrap();
        let hosts: Vec<String> = inv.select(&["all".to_string()]).unwrap().into_iter().map(|h| h.name).collect();
        assert_eq!(hosts, vec!["zeta", "mid", "alpha"]);

        let batches = get_serialized_batches(&[SerialSize::Count(1)], &hosts);
        assert_eq!(batches, vec![vec!["zeta"], vec!["mid"], vec!["alpha"]]);
    }

    #[test]
    fn test_var_layering() {
        let inv = StaticInventory::from_yaml_str(INVENTORY).unwrap();
        let web1 = inv.get_host("web1").unwrap();
        assert_eq!(web1.vars["ntp"], json!("pool"));
        assert_eq!(web1.vars["tier"], json!("web"));
        assert_eq!(web1.address(), "10.0.0.5");

        let web2 = inv.get_host("web2").unwrap();
        assert_eq!(web2.vars["tier"], json!("special"));
        assert!(web2.in_group("staging"));

        let bastion = inv.get_host("bastion").unwrap();
        assert!(bastion.in_group("ungrouped"));

        assert!(matches!(inv.get_host("web9"), Err(Error::HostNotFound(h)) if h == "web9"));
    }

    #[test]
    fn test_patterns() {
        let inv = StaticInventory::from_yaml_str(INVENTORY).unwrap();
        assert_eq!(select(&inv, "all").len(), 4);
        assert_eq!(select(&inv, "web"), vec!["web1", "web2"]);
        assert_eq!(select(&inv, "web:db"), vec!["web1", "web2", "db1"]);
        assert_eq!(select(&inv, "web,db"), vec!["web1", "web2", "db1"]);
        assert_eq!(select(&inv, "web:&staging"), vec!["web2"]);
        assert_eq!(select(&inv, "all:!web"), vec!["bastion", "db1"]);
        assert_eq!(select(&inv, "web*"), vec!["web1", "web2"]);
        assert_eq!(select(&inv, "~^db\\d$"), vec!["db1"]);
        assert!(select(&inv, "nomatch").is_empty());
    }

    #[test]
    fn test_implicit_localhost() {
        let inv = StaticInventory::new();
        let hosts = inv.select(&["localhost".to_string()]).unwrap();
        assert_eq!(names(&hosts), vec!["localhost"]);
        assert_eq!(hosts[0].connection(), Some("local"));
    }

    #[test]
    fn test_list_of_names() {
        let inv = StaticInventory::from_yaml_str("[a, b, c]").unwrap();
        assert_eq!(names(&inv.get_hosts()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_invalid_group_key() {
        let err = StaticInventory::from_yaml_str("all:\n  host: {}\n").unwrap_err();
        assert!(matches!(err, Error::InventoryLoad { .. }));
    }

    #[test]
    fn test_invalid_regex() {
        let inv = StaticInventory::from_names(["a"]);
        assert!(matches!(
            inv.select(&["~(".to_string()]),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yml");
        std::fs::write(&path, INVENTORY).unwrap();
        let inv = StaticInventory::load(&path).unwrap();
        assert_eq!(inv.len(), 4);
        assert!(inv.source().unwrap().ends_with("hosts.yml"));

        let missing = StaticInventory::load(dir.path().join("nope.yml"));
        assert!(matches!(missing, Err(Error::InventoryLoad { .. })));
    }
}
