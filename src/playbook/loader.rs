//! YAML to arena loading with field validation.
//!
//! Every key of a play, block or task mapping must name a declared field.
//! Task mappings may also carry exactly one action key known to the module
//! catalog. Any violation fails the whole load.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, trace};

use super::attribute::{AttrValue, FieldStore};
use super::fields::field_table;
use super::{EntityBody, EntityId, EntityKind, Playbook, TaskItem};
use crate::error::{Error, Result};
use crate::plugins::ModuleCatalog;
use crate::vars::{yaml_to_json, Vars};

/// Actions whose string argument is kept whole as `_raw_params`.
const FREE_FORM_ACTIONS: &[&str] = &[
    "command",
    "shell",
    "raw",
    "script",
    "meta",
    "include",
    "include_tasks",
    "import_tasks",
    "include_vars",
];

/// Keys that turn a task-list mapping into a block.
const BLOCK_KEYS: &[&str] = &["block", "rescue", "always"];

pub(crate) struct Loader<'a> {
    book: &'a mut Playbook,
    catalog: &'a ModuleCatalog,
}

impl<'a> Loader<'a> {
    pub(crate) fn new(book: &'a mut Playbook, catalog: &'a ModuleCatalog) -> Self {
        Self { book, catalog }
    }

    pub(crate) fn load_str(&mut self, content: &str) -> Result<()> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
            Error::playbook_parse(
                self.book.path.clone().unwrap_or_default(),
                "invalid YAML",
                Some(Box::new(e)),
            )
        })?;
        let root = yaml_to_json(&yaml);
        let plays = match root {
            JsonValue::Array(plays) => plays,
            JsonValue::Null => Vec::new(),
            other => {
                return Err(Error::PlaybookValidation(format!(
                    "a playbook must be a list of plays, got {}",
                    type_name(&other)
                )))
            }
        };

        for raw in &plays {
            let play = self.load_play(raw)?;
            self.book.plays.push(play);
        }
        debug!(plays = self.book.plays.len(), entities = self.book.len(), "Loaded playbook");
        Ok(())
    }

    // ========================================================================
    // Plays
    // ========================================================================

    fn load_play(&mut self, raw: &JsonValue) -> Result<EntityId> {
        let map = as_mapping(raw, "play")?;
        let attrs = load_fields(EntityKind::Play, map, &[])?;
        if !attrs.contains("hosts") {
            return Err(Error::PlaybookValidation(
                "each play requires a 'hosts' entry".to_string(),
            ));
        }

        let play = self.book.push(
            EntityKind::Play,
            None,
            EntityBody::Play {
                setup: EntityId(usize::MAX),
                pre_tasks: Vec::new(),
                tasks: Vec::new(),
                post_tasks: Vec::new(),
                handlers: Vec::new(),
                file_vars: Vars::new(),
            },
        );
        self.book.entity_mut(play).attrs = attrs;

        let setup = self.setup_block(play);
        let pre_tasks = self.load_top_level(map.get("pre_tasks"), play, false)?;
        let tasks = self.load_top_level(map.get("tasks"), play, false)?;
        let post_tasks = self.load_top_level(map.get("post_tasks"), play, false)?;
        let handlers = self.load_top_level(map.get("handlers"), play, true)?;
        let file_vars = self.load_vars_files(play)?;

        if let EntityBody::Play {
            setup: s,
            pre_tasks: p,
            tasks: t,
            post_tasks: pt,
            handlers: h,
            file_vars: fv,
        } = &mut self.book.entity_mut(play).body
        {
            *s = setup;
            *p = pre_tasks;
            *t = tasks;
            *pt = post_tasks;
            *h = handlers;
            *fv = file_vars;
        }
        trace!(play = %self.book.name(play), "Loaded play");
        Ok(play)
    }

    /// Build the implicit block holding the fact gathering task.
    fn setup_block(&mut self, play: EntityId) -> EntityId {
        let block = self.book.push(
            EntityKind::Block,
            Some(play),
            EntityBody::Block {
                block: Vec::new(),
                rescue: Vec::new(),
                always: Vec::new(),
                implicit: true,
            },
        );

        let mut args = IndexMap::new();
        let play_attrs = &self.book.entity(play).attrs;
        if let Some(subset) = play_attrs.get("gather_subset") {
            args.insert("gather_subset".to_string(), subset.to_json());
        }
        if let Some(timeout) = play_attrs.get("gather_timeout") {
            args.insert("gather_timeout".to_string(), timeout.to_json());
        }
        if let Some(path) = play_attrs.get("fact_path") {
            args.insert("fact_path".to_string(), path.to_json());
        }

        let task = self.book.push(
            EntityKind::Task,
            Some(block),
            EntityBody::Task {
                action: "setup".to_string(),
                args,
                handler: false,
            },
        );
        let attrs = &mut self.book.entity_mut(task).attrs;
        attrs.set("name", AttrValue::String("Gathering Facts".to_string()));
        attrs.set("tags", AttrValue::List(vec![JsonValue::String("always".into())]));

        if let EntityBody::Block { block: list, .. } = &mut self.book.entity_mut(block).body {
            list.push(TaskItem::Task(task));
        }
        block
    }

    fn load_vars_files(&mut self, play: EntityId) -> Result<Vars> {
        let files = self
            .book
            .entity(play)
            .attrs
            .get("vars_files")
            .map(|v| v.to_string_list())
            .unwrap_or_default();
        let base = self.book.base_dir();

        let mut vars = Vars::new();
        for file in files {
            let path = base.join(&file);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::playbook_parse(&path, "could not read vars file", Some(Box::new(e)))
            })?;
            let yaml: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| {
                Error::playbook_parse(&path, "invalid YAML in vars file", Some(Box::new(e)))
            })?;
            match yaml_to_json(&yaml) {
                JsonValue::Object(map) => vars.extend(map),
                JsonValue::Null => {}
                other => {
                    return Err(Error::PlaybookValidation(format!(
                        "vars file '{}' must contain a mapping, got {}",
                        path.display(),
                        type_name(&other)
                    )))
                }
            }
        }
        Ok(vars)
    }

    // ========================================================================
    // Blocks and task lists
    // ========================================================================

    /// Load a play-level list; bare tasks are wrapped in implicit blocks.
    fn load_top_level(
        &mut self,
        raw: Option<&JsonValue>,
        play: EntityId,
        handlers: bool,
    ) -> Result<Vec<EntityId>> {
        let mut blocks = Vec::new();
        for item in as_list(raw)? {
            let map = as_mapping(item, "task")?;
            if is_block(map) {
                blocks.push(self.load_block(map, play, handlers)?);
            } else {
                let block = self.book.push(
                    EntityKind::Block,
                    Some(play),
                    EntityBody::Block {
                        block: Vec::new(),
                        rescue: Vec::new(),
                        always: Vec::new(),
                        implicit: true,
                    },
                );
                let task = self.load_task(map, block, handlers)?;
                if let EntityBody::Block { block: list, .. } = &mut self.book.entity_mut(block).body {
                    list.push(TaskItem::Task(task));
                }
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    fn load_block(
        &mut self,
        map: &JsonMap<String, JsonValue>,
        parent: EntityId,
        handlers: bool,
    ) -> Result<EntityId> {
        let attrs = load_fields(EntityKind::Block, map, &[])?;
        let block = self.book.push(
            EntityKind::Block,
            Some(parent),
            EntityBody::Block {
                block: Vec::new(),
                rescue: Vec::new(),
                always: Vec::new(),
                implicit: false,
            },
        );
        self.book.entity_mut(block).attrs = attrs;

        let main = self.load_task_list(map.get("block"), block, handlers)?;
        let rescue = self.load_task_list(map.get("rescue"), block, handlers)?;
        let always = self.load_task_list(map.get("always"), block, handlers)?;

        if let EntityBody::Block {
            block: b,
            rescue: r,
            always: a,
            ..
        } = &mut self.book.entity_mut(block).body
        {
            *b = main;
            *r = rescue;
            *a = always;
        }
        Ok(block)
    }

    fn load_task_list(
        &mut self,
        raw: Option<&JsonValue>,
        parent: EntityId,
        handlers: bool,
    ) -> Result<Vec<TaskItem>> {
        let mut items = Vec::new();
        for item in as_list(raw)? {
            let map = as_mapping(item, "task")?;
            if is_block(map) {
                items.push(TaskItem::Block(self.load_block(map, parent, handlers)?));
            } else {
                items.push(TaskItem::Task(self.load_task(map, parent, handlers)?));
            }
        }
        Ok(items)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    fn load_task(
        &mut self,
        map: &JsonMap<String, JsonValue>,
        parent: EntityId,
        handler: bool,
    ) -> Result<EntityId> {
        let table = field_table(EntityKind::Task);
        let mut action: Option<(String, JsonValue)> = None;
        let mut delegate_local = false;
        let mut field_keys = JsonMap::new();

        for (key, value) in map {
            if key == "listen" && !handler {
                return Err(Error::unknown_field("task", key));
            }
            if key == "action" || key == "local_action" {
                let (name, raw) = split_action_value(value)?;
                if !self.catalog.contains(&name) {
                    return Err(Error::ModuleNotFound(name));
                }
                let name = self.catalog.canonical_name(&name).to_string();
                set_action(&mut action, (name, raw))?;
                delegate_local |= key == "local_action";
            } else if table.lookup(key).is_some() {
                field_keys.insert(key.clone(), value.clone());
            } else if self.catalog.contains(key) {
                let name = self.catalog.canonical_name(key).to_string();
                set_action(&mut action, (name, value.clone()))?;
            } else {
                return Err(Error::unknown_field("task", key));
            }
        }

        let Some((action, raw_args)) = action else {
            return Err(Error::PlaybookValidation(format!(
                "no action detected in task{}",
                map.get("name")
                    .and_then(JsonValue::as_str)
                    .map(|n| format!(" '{}'", n))
                    .unwrap_or_default()
            )));
        };

        let mut attrs = load_fields(EntityKind::Task, &field_keys, &["action", "args"])?;
        if delegate_local && !attrs.contains("delegate_to") {
            attrs.set("delegate_to", AttrValue::String("localhost".to_string()));
        }

        let mut args = parse_args(&action, &raw_args)?;
        if let Some(extra) = map.get("args") {
            let extra = match extra {
                JsonValue::Object(extra) => extra,
                other => {
                    return Err(Error::invalid_field("args", "a mapping", other.to_string()));
                }
            };
            for (k, v) in extra {
                args.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        let task = self.book.push(
            EntityKind::Task,
            Some(parent),
            EntityBody::Task {
                action,
                args,
                handler,
            },
        );
        self.book.entity_mut(task).attrs = attrs;
        Ok(task)
    }
}

/// Load declared fields of a mapping into a store, in priority order.
///
/// Structural keys (`skip_load`) are accepted but not stored. Keys listed in
/// `skip` are ignored entirely.
fn load_fields(
    kind: EntityKind,
    map: &JsonMap<String, JsonValue>,
    skip: &[&str],
) -> Result<FieldStore> {
    let table = field_table(kind);
    for key in map.keys() {
        if skip.contains(&key.as_str()) {
            continue;
        }
        if table.lookup(key).is_none() {
            return Err(Error::unknown_field(kind.as_str(), key));
        }
    }

    let mut store = FieldStore::new();
    for field in table.by_priority() {
        if field.skip_load {
            continue;
        }
        let raw = map.get(field.name).or_else(|| field.alias.and_then(|a| map.get(a)));
        if let Some(raw) = raw {
            if let Some(value) = field.coerce(raw)? {
                store.set(field.name, value);
            }
        }
    }
    Ok(store)
}

fn set_action(slot: &mut Option<(String, JsonValue)>, found: (String, JsonValue)) -> Result<()> {
    if let Some((existing, _)) = slot {
        return Err(Error::PlaybookValidation(format!(
            "conflicting action statements: {}, {}",
            existing, found.0
        )));
    }
    *slot = Some(found);
    Ok(())
}

/// Split an `action:` value into module name and raw arguments.
fn split_action_value(value: &JsonValue) -> Result<(String, JsonValue)> {
    match value {
        JsonValue::String(s) => {
            let s = s.trim();
            let (module, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
            if module.is_empty() {
                return Err(Error::PlaybookValidation("empty action statement".to_string()));
            }
            Ok((module.to_string(), JsonValue::String(rest.trim().to_string())))
        }
        JsonValue::Object(map) => {
            let module = map
                .get("module")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| Error::PlaybookValidation("action mapping needs a 'module' key".into()))?;
            let args: JsonMap<String, JsonValue> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "module")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Ok((module.to_string(), JsonValue::Object(args)))
        }
        other => Err(Error::invalid_field("action", "a string or mapping", other.to_string())),
    }
}

/// Turn the raw value under an action key into an argument map.
fn parse_args(action: &str, raw: &JsonValue) -> Result<IndexMap<String, JsonValue>> {
    let mut args = IndexMap::new();
    match raw {
        JsonValue::Null => {}
        JsonValue::Object(map) => {
            args.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        JsonValue::String(s) if FREE_FORM_ACTIONS.contains(&action) => {
            if !s.is_empty() {
                args.insert("_raw_params".to_string(), JsonValue::String(s.clone()));
            }
        }
        JsonValue::String(s) => {
            let words = shell_words::split(s).map_err(|e| {
                Error::PlaybookValidation(format!("could not parse arguments of '{}': {}", action, e))
            })?;
            let mut free = Vec::new();
            for word in words {
                match word.split_once('=') {
                    Some((k, v)) if !k.is_empty() => {
                        args.insert(k.to_string(), JsonValue::String(v.to_string()));
                    }
                    _ => free.push(word),
                }
            }
            if !free.is_empty() {
                args.insert("_raw_params".to_string(), JsonValue::String(free.join(" ")));
            }
        }
        JsonValue::Bool(_) | JsonValue::Number(_) => {
            args.insert("_raw_params".to_string(), raw.clone());
        }
        JsonValue::Array(_) => {
            return Err(Error::invalid_field(action.to_string(), "a string or mapping", raw.to_string()));
        }
    }
    Ok(args)
}

fn is_block(map: &JsonMap<String, JsonValue>) -> bool {
    BLOCK_KEYS.iter().any(|k| map.contains_key(*k))
}

fn as_mapping<'v>(raw: &'v JsonValue, what: &str) -> Result<&'v JsonMap<String, JsonValue>> {
    raw.as_object().ok_or_else(|| {
        Error::PlaybookValidation(format!("a {} must be a mapping, got {}", what, type_name(raw)))
    })
}

fn as_list(raw: Option<&JsonValue>) -> Result<&[JsonValue]> {
    match raw {
        None | Some(JsonValue::Null) => Ok(&[]),
        Some(JsonValue::Array(items)) => Ok(items),
        Some(other) => Err(Error::PlaybookValidation(format!(
            "a task list must be a list, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}
