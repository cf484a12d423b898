//! Task specification and task results.
//!
//! A [`TaskSpec`] is a task entity with every field resolved through its
//! parent chain, built once per play so workers never touch the arena. A
//! [`TaskResult`] is the open map an action returns, with typed accessors
//! for the keys the engine itself interprets.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::playbook::{EntityId, Playbook, Resolve};
use crate::vars::Vars;

/// Result key carrying handler names to notify.
pub const NOTIFY_KEY: &str = "_ansible_notify";

/// A task with its effective field values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Arena handle, absent for synthetic tasks
    #[serde(skip)]
    pub id: Option<EntityId>,
    pub name: String,
    pub action: String,
    pub args: IndexMap<String, JsonValue>,
    pub when: Vec<String>,
    pub changed_when: Vec<String>,
    pub failed_when: Vec<String>,
    pub until: Vec<String>,
    pub retries: Option<i64>,
    pub delay: Option<i64>,
    pub register: Option<String>,
    pub notify: Vec<String>,
    pub loop_items: Option<JsonValue>,
    pub tags: Vec<String>,
    pub ignore_errors: bool,
    pub ignore_unreachable: bool,
    /// Connection set on the task or an ancestor, without the default
    pub connection: Option<String>,
    pub remote_user: Option<String>,
    pub port: Option<u16>,
    #[serde(rename = "become")]
    pub become_: bool,
    pub become_user: Option<String>,
    pub become_method: String,
    pub become_flags: Option<String>,
    pub delegate_to: Option<String>,
    pub run_once: bool,
    pub any_errors_fatal: bool,
    pub environment: IndexMap<String, JsonValue>,
    pub no_log: bool,
    pub check_mode: Option<bool>,
    /// Play, block and task variables in scope
    pub vars: Vars,
    pub listen: Vec<String>,
    pub handler: bool,
}

impl TaskSpec {
    /// A bare task, mostly useful for tests and synthetic work.
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            become_method: "sudo".to_string(),
            ..Self::default()
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Resolve every field of a task entity.
    pub fn from_entity(book: &Playbook, id: EntityId) -> Self {
        let view = book.entity_ref(id);
        let (action, args) = book
            .task_action(id)
            .map(|(action, args)| (action.to_string(), args.clone()))
            .unwrap_or_default();

        Self {
            id: Some(id),
            name: book.name(id),
            action,
            args,
            when: view.get_string_list("when"),
            changed_when: view.get_string_list("changed_when"),
            failed_when: view.get_string_list("failed_when"),
            until: view.get_string_list("until"),
            retries: view.get_int("retries"),
            delay: view.get_int("delay"),
            register: view.get_string("register"),
            notify: view.get_string_list("notify"),
            loop_items: view.resolve_attr("loop").map(|v| v.to_json()),
            tags: view.get_string_list("tags"),
            ignore_errors: view.get_bool("ignore_errors"),
            ignore_unreachable: view.get_bool("ignore_unreachable"),
            connection: book
                .resolve(id, "connection")
                .and_then(|v| v.as_str().map(str::to_string)),
            remote_user: view.get_string("remote_user"),
            port: view.get_int("port").and_then(|p| u16::try_from(p).ok()),
            become_: view.get_bool("become"),
            become_user: view.get_string("become_user"),
            become_method: view.get_string("become_method").unwrap_or_else(|| "sudo".to_string()),
            become_flags: view.get_string("become_flags"),
            delegate_to: view.get_string("delegate_to"),
            run_once: view.get_bool("run_once"),
            any_errors_fatal: view.get_bool("any_errors_fatal"),
            environment: view.get_map("environment"),
            no_log: view.get_bool("no_log"),
            check_mode: view.get_opt_bool("check_mode"),
            vars: book.scoped_vars(id),
            listen: view.get_string_list("listen"),
            handler: book.is_handler(id),
        }
    }

    /// Whether this is the in-band `meta` pseudo action.
    pub fn is_meta(&self) -> bool {
        self.action == "meta"
    }

    /// The `meta` directive, e.g. `flush_handlers`.
    pub fn meta_directive(&self) -> Option<&str> {
        self.args
            .get("_raw_params")
            .or_else(|| self.args.get("free_form"))
            .and_then(JsonValue::as_str)
            .map(str::trim)
    }

    /// Names a notification can use to reach this handler.
    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.listen.iter().map(String::as_str))
    }
}

/// Outcome of one task invocation on one host.
///
/// Any key may be present. The engine interprets `changed`, `failed`,
/// `skipped`, `unreachable`, `rc`, `msg`, `ansible_facts` and the notify
/// key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskResult(IndexMap<String, JsonValue>);

impl TaskResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a successful result
    pub fn ok() -> Self {
        Self::new().with("changed", json!(false))
    }

    /// Create a changed result
    pub fn changed() -> Self {
        Self::new().with("changed", json!(true))
    }

    /// Create a skipped result
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new()
            .with("changed", json!(false))
            .with("skipped", json!(true))
            .with("skip_reason", JsonValue::String(reason.into()))
    }

    /// Create a failed result
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::new()
            .with("changed", json!(false))
            .with("failed", json!(true))
            .with("msg", JsonValue::String(msg.into()))
    }

    /// Create an unreachable result
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::new()
            .with("changed", json!(false))
            .with("unreachable", json!(true))
            .with("msg", JsonValue::String(msg.into()))
    }

    /// Build a result from a JSON object. Other values land under `value`.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => Self(map.into_iter().collect()),
            other => Self::new().with("value", other),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &IndexMap<String, JsonValue> {
        &self.0
    }

    pub fn into_map(self) -> IndexMap<String, JsonValue> {
        self.0
    }

    fn flag(&self, key: &str) -> bool {
        self.0.get(key).map(coerce_bool).unwrap_or(false)
    }

    pub fn is_changed(&self) -> bool {
        self.flag("changed")
    }

    pub fn is_failed(&self) -> bool {
        self.flag("failed")
    }

    pub fn is_skipped(&self) -> bool {
        self.flag("skipped")
    }

    pub fn is_unreachable(&self) -> bool {
        self.flag("unreachable")
    }

    pub fn rc(&self) -> Option<i64> {
        self.0.get("rc").and_then(JsonValue::as_i64)
    }

    pub fn msg(&self) -> Option<&str> {
        self.0.get("msg").and_then(JsonValue::as_str)
    }

    /// Handler names the task asked to notify, removed from the result.
    pub fn take_notify(&mut self) -> Vec<String> {
        match self.0.shift_remove(NOTIFY_KEY) {
            Some(JsonValue::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(JsonValue::String(name)) => vec![name],
            _ => Vec::new(),
        }
    }

    /// Facts returned under `ansible_facts`.
    pub fn facts(&self) -> Option<&serde_json::Map<String, JsonValue>> {
        self.0.get("ansible_facts").and_then(JsonValue::as_object)
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl From<IndexMap<String, JsonValue>> for TaskResult {
    fn from(map: IndexMap<String, JsonValue>) -> Self {
        Self(map)
    }
}

/// Loose truthiness for result flags: booleans, numbers and the usual
/// string spellings.
pub fn coerce_bool(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "yes" | "true" | "on" | "1" | "y"
        ),
        JsonValue::Null => false,
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}
