//! Playbook entity model.
//!
//! Plays, blocks and tasks live in a single arena owned by [`Playbook`].
//! Entities refer to each other through [`EntityId`] handles: children are
//! listed by their containers, and each entity keeps a non-owning parent
//! handle used only for attribute inheritance.
//!
//! # Attribute resolution
//!
//! [`Playbook::get_inherited_value`] computes the effective value of a field:
//!
//! 1. Non-inheritable fields, parentless entities and squashed entities use
//!    their own value, falling back to the descriptor default.
//! 2. An unset inheritable field takes the parent's resolved value.
//! 3. Extending fields combine the parent's resolved value with the own one.
//!
//! Resolution is a pure read: it never touches stored values.
//!
//! # Example
//!
//! ```rust
//! use playengine::playbook::{Playbook, Resolve};
//! use playengine::plugins::ModuleCatalog;
//!
//! let yaml = r#"
//! - hosts: all
//!   tags: [deploy]
//!   tasks:
//!     - name: say hi
//!       debug: { msg: hi }
//!       tags: web
//! "#;
//! let book = Playbook::from_yaml_str(yaml, &ModuleCatalog::builtin()).unwrap();
//! let task = book.tasks_of(book.plays()[0])[0];
//! assert_eq!(book.entity_ref(task).get_string_list("tags"), vec!["deploy", "web"]);
//! ```

pub mod attribute;
pub mod compile;
pub mod fields;
mod loader;
pub mod play_context;

pub use attribute::{AttrValue, FieldAttribute, FieldDefault, FieldStore, FieldType};
pub use compile::{CompiledBlock, CompiledItem};
pub use fields::{field_table, FieldTable};
pub use play_context::PlayContext;

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::plugins::ModuleCatalog;
use crate::vars::Vars;
use attribute::extend_value;

/// Handle of an entity in a [`Playbook`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of a playbook entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Play,
    Block,
    Task,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Play => "play",
            EntityKind::Block => "block",
            EntityKind::Task => "task",
        }
    }
}

/// An item of a block's task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskItem {
    Task(EntityId),
    Block(EntityId),
}

/// Kind-specific structure of an entity.
#[derive(Debug, Clone)]
pub enum EntityBody {
    Play {
        /// Implicit block holding the fact gathering task
        setup: EntityId,
        pre_tasks: Vec<EntityId>,
        tasks: Vec<EntityId>,
        post_tasks: Vec<EntityId>,
        handlers: Vec<EntityId>,
        /// Variables read from `vars_files`
        file_vars: Vars,
    },
    Block {
        block: Vec<TaskItem>,
        rescue: Vec<TaskItem>,
        always: Vec<TaskItem>,
        /// Created by the loader to wrap bare tasks
        implicit: bool,
    },
    Task {
        action: String,
        args: IndexMap<String, JsonValue>,
        /// Defined under a play's `handlers`
        handler: bool,
    },
}

/// One arena slot.
#[derive(Debug, Clone)]
pub struct Entity {
    kind: EntityKind,
    parent: Option<EntityId>,
    attrs: FieldStore,
    squashed: bool,
    body: EntityBody,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// Own stored values, unresolved.
    pub fn attrs(&self) -> &FieldStore {
        &self.attrs
    }

    pub fn is_squashed(&self) -> bool {
        self.squashed
    }

    pub fn body(&self) -> &EntityBody {
        &self.body
    }
}

/// A loaded playbook: the entity arena plus the ordered list of plays.
#[derive(Debug, Clone, Default)]
pub struct Playbook {
    entities: Vec<Entity>,
    plays: Vec<EntityId>,
    path: Option<PathBuf>,
}

impl Playbook {
    /// Load a playbook file.
    pub fn load(path: impl AsRef<Path>, catalog: &ModuleCatalog) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::playbook_parse(path, "could not read playbook", Some(Box::new(e)))
        })?;
        let mut book = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        loader::Loader::new(&mut book, catalog).load_str(&content)?;
        Ok(book)
    }

    /// Load a playbook from YAML text. Relative `vars_files` resolve against
    /// the working directory.
    pub fn from_yaml_str(content: &str, catalog: &ModuleCatalog) -> Result<Self> {
        let mut book = Self::default();
        loader::Loader::new(&mut book, catalog).load_str(content)?;
        Ok(book)
    }

    /// Source path, when loaded from a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Directory used to resolve relative paths.
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Plays in playbook order.
    pub fn plays(&self) -> &[EntityId] {
        &self.plays
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn kind(&self, id: EntityId) -> EntityKind {
        self.entity(id).kind
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.entity(id).parent
    }

    /// A resolving view of one entity.
    pub fn entity_ref(&self, id: EntityId) -> EntityRef<'_> {
        EntityRef { book: self, id }
    }

    /// Display name: the `name` field, or the action for unnamed tasks.
    pub fn name(&self, id: EntityId) -> String {
        if let Some(name) = self.entity(id).attrs.get("name").and_then(|v| v.as_str()) {
            return name.to_string();
        }
        match &self.entity(id).body {
            EntityBody::Task { action, .. } => action.clone(),
            EntityBody::Play { .. } => self
                .get_inherited_value(id, "hosts")
                .map(|v| v.to_string_list().join(","))
                .unwrap_or_default(),
            EntityBody::Block { .. } => String::new(),
        }
    }

    /// Action name and arguments of a task.
    pub fn task_action(&self, id: EntityId) -> Option<(&str, &IndexMap<String, JsonValue>)> {
        match &self.entity(id).body {
            EntityBody::Task { action, args, .. } => Some((action.as_str(), args)),
            _ => None,
        }
    }

    /// Whether a task was declared under `handlers`.
    pub fn is_handler(&self, id: EntityId) -> bool {
        matches!(self.entity(id).body, EntityBody::Task { handler: true, .. })
    }

    /// The `block`, `rescue` and `always` lists of a block.
    pub fn block_lists(&self, id: EntityId) -> Option<(&[TaskItem], &[TaskItem], &[TaskItem])> {
        match &self.entity(id).body {
            EntityBody::Block {
                block,
                rescue,
                always,
                ..
            } => Some((block, rescue, always)),
            _ => None,
        }
    }

    /// Whether a block was created implicitly around bare tasks.
    pub fn is_implicit_block(&self, id: EntityId) -> bool {
        matches!(self.entity(id).body, EntityBody::Block { implicit: true, .. })
    }

    /// Top-level blocks of a play in run order: setup, pre_tasks, tasks,
    /// post_tasks.
    pub fn play_blocks(&self, play: EntityId) -> Vec<EntityId> {
        match &self.entity(play).body {
            EntityBody::Play {
                setup,
                pre_tasks,
                tasks,
                post_tasks,
                ..
            } => std::iter::once(*setup)
                .chain(pre_tasks.iter().copied())
                .chain(tasks.iter().copied())
                .chain(post_tasks.iter().copied())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Handler blocks of a play.
    pub fn handler_blocks(&self, play: EntityId) -> &[EntityId] {
        match &self.entity(play).body {
            EntityBody::Play { handlers, .. } => handlers,
            _ => &[],
        }
    }

    /// The synthetic fact gathering task of a play.
    pub fn setup_task(&self, play: EntityId) -> Option<EntityId> {
        let EntityBody::Play { setup, .. } = &self.entity(play).body else {
            return None;
        };
        self.block_lists(*setup)
            .and_then(|(block, _, _)| block.first().copied())
            .and_then(|item| match item {
                TaskItem::Task(id) => Some(id),
                TaskItem::Block(_) => None,
            })
    }

    /// Every task leaf under a play's regular blocks, depth first.
    pub fn tasks_of(&self, play: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        for block in self.play_blocks(play).into_iter().skip(1) {
            self.collect_tasks(block, &mut out);
        }
        out
    }

    /// Every task leaf under a block (block, rescue, then always), depth first.
    pub fn collect_tasks(&self, block: EntityId, out: &mut Vec<EntityId>) {
        if let Some((main, rescue, always)) = self.block_lists(block) {
            for item in main.iter().chain(rescue).chain(always) {
                match *item {
                    TaskItem::Task(id) => out.push(id),
                    TaskItem::Block(id) => self.collect_tasks(id, out),
                }
            }
        }
    }

    /// The play an entity belongs to.
    pub fn play_of(&self, id: EntityId) -> Option<EntityId> {
        let mut current = Some(id);
        while let Some(cur) = current {
            if self.kind(cur) == EntityKind::Play {
                return Some(cur);
            }
            current = self.parent(cur);
        }
        None
    }

    // ========================================================================
    // Attribute resolution
    // ========================================================================

    /// The descriptor of `attr` for an entity.
    ///
    /// # Panics
    ///
    /// Panics when `attr` is not declared for the entity's kind. Asking for
    /// an undeclared attribute is a programming error.
    pub fn descriptor(&self, id: EntityId, attr: &str) -> &'static FieldAttribute {
        let kind = self.kind(id);
        field_table(kind)
            .get(attr)
            .unwrap_or_else(|| panic!("'{}' is not a declared attribute of a {}", attr, kind.as_str()))
    }

    /// Resolve `attr` without applying the descriptor default.
    pub fn resolve(&self, id: EntityId, attr: &str) -> Option<AttrValue> {
        let field = self.descriptor(id, attr);
        let entity = self.entity(id);
        let own = entity.attrs.get(field.name).cloned();

        if !field.inherit || entity.squashed {
            return own;
        }
        let Some(parent) = entity.parent else {
            return own;
        };
        if !field_table(self.kind(parent)).contains(field.name) {
            return own;
        }

        if field.extend {
            extend_value(own, self.resolve(parent, field.name), field.prepend)
        } else {
            match own {
                Some(value) if !value.is_zero() => Some(value),
                // A zero own value stands only when no ancestor sets one
                own => self.resolve(parent, field.name).or(own),
            }
        }
    }

    /// Resolve the effective value of `attr`, falling back to its default.
    pub fn get_inherited_value(&self, id: EntityId, attr: &str) -> Option<AttrValue> {
        self.resolve(id, attr)
            .or_else(|| self.descriptor(id, attr).default_value())
    }

    /// Freeze an entity: store every resolved value as its own and stop
    /// consulting the parent chain.
    pub fn squash(&mut self, id: EntityId) {
        if self.entity(id).squashed {
            return;
        }
        let kind = self.kind(id);
        let resolved: Vec<(&'static str, AttrValue)> = field_table(kind)
            .iter()
            .filter(|field| !field.skip_load)
            .filter_map(|field| {
                self.get_inherited_value(id, field.name)
                    .map(|value| (field.name, value))
            })
            .collect();
        let entity = &mut self.entities[id.0];
        for (name, value) in resolved {
            entity.attrs.set(name, value);
        }
        entity.squashed = true;
    }

    /// Variables visible to an entity: play vars and `vars_files`, then each
    /// enclosing block's vars, then the entity's own.
    pub fn scoped_vars(&self, id: EntityId) -> Vars {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            chain.push(cur);
            current = self.parent(cur);
        }

        let mut vars = Vars::new();
        for cur in chain.into_iter().rev() {
            let entity = self.entity(cur);
            if let EntityBody::Play { file_vars, .. } = &entity.body {
                if let Some(own) = entity.attrs.get("vars").and_then(|v| v.as_map()) {
                    crate::vars::merge_vars(&mut vars, own);
                }
                crate::vars::merge_vars(&mut vars, file_vars);
                continue;
            }
            if let Some(own) = entity.attrs.get("vars").and_then(|v| v.as_map()) {
                crate::vars::merge_vars(&mut vars, own);
            }
        }
        vars
    }

    // ========================================================================
    // Arena construction (loader only)
    // ========================================================================

    fn push(&mut self, kind: EntityKind, parent: Option<EntityId>, body: EntityBody) -> EntityId {
        let id = EntityId(self.entities.len());
        self.entities.push(Entity {
            kind,
            parent,
            attrs: FieldStore::new(),
            squashed: false,
            body,
        });
        id
    }

    fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0]
    }
}

/// Resolution capability shared by every entity view.
///
/// Typed getters apply the descriptor default and coerce the stored value.
pub trait Resolve {
    fn resolve_attr(&self, attr: &str) -> Option<AttrValue>;

    fn get_string(&self, attr: &str) -> Option<String> {
        self.resolve_attr(attr)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn get_bool(&self, attr: &str) -> bool {
        self.resolve_attr(attr)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn get_opt_bool(&self, attr: &str) -> Option<bool> {
        self.resolve_attr(attr).and_then(|v| v.as_bool())
    }

    fn get_int(&self, attr: &str) -> Option<i64> {
        self.resolve_attr(attr).and_then(|v| v.as_int())
    }

    fn get_float(&self, attr: &str) -> Option<f64> {
        self.resolve_attr(attr).and_then(|v| v.as_float())
    }

    fn get_string_list(&self, attr: &str) -> Vec<String> {
        self.resolve_attr(attr)
            .map(|v| v.to_string_list())
            .unwrap_or_default()
    }

    fn get_list(&self, attr: &str) -> Vec<JsonValue> {
        self.resolve_attr(attr)
            .and_then(|v| v.as_list().map(<[JsonValue]>::to_vec))
            .unwrap_or_default()
    }

    fn get_map(&self, attr: &str) -> IndexMap<String, JsonValue> {
        self.resolve_attr(attr)
            .and_then(|v| v.as_map().cloned())
            .unwrap_or_default()
    }
}

/// A borrowed view of one entity that resolves through its parent chain.
#[derive(Debug, Clone, Copy)]
pub struct EntityRef<'a> {
    book: &'a Playbook,
    id: EntityId,
}

impl<'a> EntityRef<'a> {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.book.kind(self.id)
    }

    pub fn name(&self) -> String {
        self.book.name(self.id)
    }

    /// The explicitly set value, ignoring parents and defaults.
    pub fn own(&self, attr: &str) -> Option<&'a AttrValue> {
        self.book.descriptor(self.id, attr);
        self.book.entity(self.id).attrs.get(attr)
    }
}

impl Resolve for EntityRef<'_> {
    fn resolve_attr(&self, attr: &str) -> Option<AttrValue> {
        self.book.get_inherited_value(self.id, attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(yaml: &str) -> Playbook {
        Playbook::from_yaml_str(yaml, &ModuleCatalog::builtin()).unwrap()
    }

    const NESTED: &str = r#"
- hosts: all
  connection: local
  ignore_errors: true
  tags: [play]
  tasks:
    - name: outer
      tags: [outer]
      when: first
      block:
        - name: inner
          tags: [task]
          when: second
          debug: { msg: hi }
          vars: { a: 1 }
"#;

    #[test]
    fn test_inherits_from_play_through_block() {
        let book = load(NESTED);
        let task = book.tasks_of(book.plays()[0])[0];
        assert_eq!(book.entity_ref(task).get_string("connection").as_deref(), Some("local"));
        assert!(book.entity_ref(task).get_bool("ignore_errors"));
    }

    #[test]
    fn test_extend_collects_parent_chain() {
        let book = load(NESTED);
        let task = book.tasks_of(book.plays()[0])[0];
        assert_eq!(
            book.entity_ref(task).get_string_list("tags"),
            vec!["play", "outer", "task"]
        );
        assert_eq!(book.entity_ref(task).get_string_list("when"), vec!["first", "second"]);
    }

    #[test]
    fn test_non_inheritable_never_consults_parent() {
        let book = load(NESTED);
        let task = book.tasks_of(book.plays()[0])[0];
        let block = book.parent(task).unwrap();
        assert_eq!(book.name(block), "outer");
        assert_eq!(book.entity_ref(task).get_string("name").as_deref(), Some("inner"));

        let play = book.plays()[0];
        let setup = book.setup_task(play).unwrap();
        assert!(book.resolve(setup, "vars").is_none());
    }

    #[test]
    fn test_default_when_unset_everywhere() {
        let book = load("- hosts: all\n  tasks:\n    - ping:\n");
        let task = book.tasks_of(book.plays()[0])[0];
        assert_eq!(book.entity_ref(task).get_string("connection").as_deref(), Some("smart"));
        assert_eq!(book.entity_ref(task).get_int("retries"), Some(3));
        assert!(book.resolve(task, "connection").is_none());
    }

    #[test]
    fn test_zero_values_fall_back_to_parent() {
        let yaml = r#"
- hosts: all
  ignore_errors: true
  remote_user: deploy
  tasks:
    - ping:
      ignore_errors: false
      remote_user: ""
    - ping:
      ignore_errors: no
      become: false
"#;
        let book = load(yaml);
        let tasks = book.tasks_of(book.plays()[0]);
        let first = book.entity_ref(tasks[0]);
        assert!(first.get_bool("ignore_errors"));
        assert_eq!(first.get_string("remote_user").as_deref(), Some("deploy"));

        // Nothing above sets `become`, so the task's own false stands
        let second = book.entity_ref(tasks[1]);
        assert!(second.get_bool("ignore_errors"));
        assert_eq!(book.resolve(tasks[1], "become"), Some(AttrValue::Bool(false)));
    }

    #[test]
    fn test_resolution_is_pure() {
        let book = load(NESTED);
        let task = book.tasks_of(book.plays()[0])[0];
        let before = book.entity(task).attrs().clone();
        let first = book.get_inherited_value(task, "tags");
        let second = book.get_inherited_value(task, "tags");
        assert_eq!(first, second);
        assert_eq!(book.entity(task).attrs(), &before);
    }

    #[test]
    #[should_panic(expected = "not a declared attribute")]
    fn test_unknown_attribute_panics() {
        let book = load(NESTED);
        let play = book.plays()[0];
        book.get_inherited_value(play, "when");
    }

    #[test]
    fn test_squash_freezes_resolution() {
        let mut book = load(NESTED);
        let task = book.tasks_of(book.plays()[0])[0];
        book.squash(task);
        assert!(book.entity(task).is_squashed());
        assert_eq!(
            book.entity(task).attrs().get("connection"),
            Some(&AttrValue::String("local".into()))
        );
        assert_eq!(
            book.entity_ref(task).get_string_list("tags"),
            vec!["play", "outer", "task"]
        );
    }

    #[test]
    fn test_scoped_vars_layering() {
        let yaml = r#"
- hosts: all
  vars: { a: play, b: play }
  tasks:
    - block:
        - debug: { msg: x }
          vars: { b: task }
      vars: { a: block }
"#;
        let book = load(yaml);
        let task = book.tasks_of(book.plays()[0])[0];
        let vars = book.scoped_vars(task);
        assert_eq!(vars["a"], json!("block"));
        assert_eq!(vars["b"], json!("task"));
    }
}
