//! Host definition for the inventory.
//!
//! A `Host` is a managed node: a name, the variables the inventory assigns
//! to it (group variables already layered underneath host variables) and
//! every group it belongs to, ancestors included.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::vars::Vars;

/// A managed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Inventory hostname
    pub name: String,

    /// Effective inventory variables
    #[serde(default)]
    pub vars: Vars,

    /// Group membership, `all` first
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Host {
    /// Create a host that only belongs to `all`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: Vars::new(),
            groups: vec!["all".to_string()],
        }
    }

    /// Builder-style variable assignment.
    pub fn with_var(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Builder-style group assignment.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Address to connect to: `ansible_host`, else the inventory name.
    pub fn address(&self) -> &str {
        self.vars
            .get("ansible_host")
            .and_then(JsonValue::as_str)
            .unwrap_or(&self.name)
    }

    /// Connection type forced by inventory, if any.
    pub fn connection(&self) -> Option<&str> {
        self.vars.get("ansible_connection").and_then(JsonValue::as_str)
    }

    /// Whether the host names the control node itself.
    pub fn is_localhost(&self) -> bool {
        matches!(self.name.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_prefers_ansible_host() {
        let host = Host::new("web1").with_var("ansible_host", json!("10.0.0.5"));
        assert_eq!(host.address(), "10.0.0.5");
        assert_eq!(Host::new("web2").address(), "web2");
    }

    #[test]
    fn test_groups() {
        let host = Host::new("db1").with_group("db").with_group("db");
        assert_eq!(host.groups, vec!["all", "db"]);
        assert!(host.in_group("db"));
        assert!(!host.in_group("web"));
    }

    #[test]
    fn test_localhost_detection() {
        assert!(Host::new("localhost").is_localhost());
        assert!(Host::new("127.0.0.1").is_localhost());
        assert!(!Host::new("web1").is_localhost());
    }
}
