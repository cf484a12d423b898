//! Field tables per entity kind.
//!
//! Tables are assembled from shared groups the way plays, blocks and tasks
//! share behavior: every kind gets the base group; blocks and tasks add the
//! conditional, taggable and become groups; plays add taggable and become.

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use super::attribute::{FieldAttribute, FieldType};
use super::EntityKind;

static BASE_FIELDS: &[FieldAttribute] = &[
    FieldAttribute::string("name").no_inherit(),
    FieldAttribute::string("connection").default_str("smart"),
    FieldAttribute::int("port"),
    FieldAttribute::string("remote_user"),
    FieldAttribute::map("vars").no_inherit().priority(100),
    FieldAttribute::map("environment").extend().prepend(),
    FieldAttribute::boolean("no_log"),
    FieldAttribute::boolean("run_once"),
    FieldAttribute::boolean("ignore_errors"),
    FieldAttribute::boolean("ignore_unreachable"),
    FieldAttribute::boolean("check_mode"),
    FieldAttribute::boolean("diff"),
    FieldAttribute::boolean("any_errors_fatal"),
    FieldAttribute::string("debugger"),
];

static CONDITIONAL_FIELDS: &[FieldAttribute] = &[FieldAttribute::string_list("when").extend()];

static TAGGABLE_FIELDS: &[FieldAttribute] = &[FieldAttribute::string_list("tags").extend()];

static BECOME_FIELDS: &[FieldAttribute] = &[
    FieldAttribute::boolean("become"),
    FieldAttribute::string("become_user"),
    FieldAttribute::string("become_method").default_str("sudo"),
    FieldAttribute::string("become_flags"),
];

static BLOCK_FIELDS: &[FieldAttribute] = &[
    FieldAttribute::list("block").skip_load(),
    FieldAttribute::list("rescue").skip_load(),
    FieldAttribute::list("always").skip_load(),
    FieldAttribute::string("delegate_to"),
    FieldAttribute::boolean("delegate_facts"),
];

static TASK_FIELDS: &[FieldAttribute] = &[
    FieldAttribute::new("action", FieldType::Any).skip_load(),
    FieldAttribute::map("args").skip_load(),
    FieldAttribute::int("async_val").default_int(0).alias("async"),
    FieldAttribute::string_list("changed_when").no_inherit(),
    FieldAttribute::int("delay").no_inherit(),
    FieldAttribute::string("delegate_to"),
    FieldAttribute::boolean("delegate_facts"),
    FieldAttribute::string_list("failed_when").no_inherit(),
    FieldAttribute::new("loop", FieldType::Any).no_inherit(),
    FieldAttribute::string_list("notify").no_inherit(),
    FieldAttribute::int("poll").default_int(10),
    FieldAttribute::string("register").no_inherit(),
    FieldAttribute::int("retries").default_int(3).no_inherit(),
    FieldAttribute::string_list("until").no_inherit(),
    FieldAttribute::string_list("listen").no_inherit(),
];

static PLAY_FIELDS: &[FieldAttribute] = &[
    FieldAttribute::list("pre_tasks").skip_load(),
    FieldAttribute::list("tasks").skip_load(),
    FieldAttribute::list("post_tasks").skip_load(),
    FieldAttribute::list("handlers").skip_load(),
    FieldAttribute::string_list("hosts").required(),
    FieldAttribute::string("fact_path"),
    FieldAttribute::boolean("gather_facts"),
    FieldAttribute::string_list("gather_subset"),
    FieldAttribute::int("gather_timeout"),
    FieldAttribute::string_list("vars_files").priority(99),
    FieldAttribute::boolean("force_handlers"),
    FieldAttribute::new("max_fail_percentage", FieldType::Float),
    FieldAttribute::list("serial"),
    FieldAttribute::string("strategy"),
    FieldAttribute::string("order"),
];

/// Descriptor table of one entity kind, keyed by canonical name.
#[derive(Debug)]
pub struct FieldTable {
    fields: IndexMap<&'static str, &'static FieldAttribute>,
    aliases: IndexMap<&'static str, &'static str>,
}

impl FieldTable {
    fn build(groups: &[&'static [FieldAttribute]]) -> Self {
        let mut fields = IndexMap::new();
        let mut aliases = IndexMap::new();
        for group in groups {
            for field in group.iter() {
                fields.insert(field.name, field);
                if let Some(alias) = field.alias {
                    aliases.insert(alias, field.name);
                }
            }
        }
        Self { fields, aliases }
    }

    /// Look up a descriptor by canonical name.
    pub fn get(&self, name: &str) -> Option<&'static FieldAttribute> {
        self.fields.get(name).copied()
    }

    /// Look up a descriptor by canonical name or alias.
    pub fn lookup(&self, key: &str) -> Option<&'static FieldAttribute> {
        self.get(key)
            .or_else(|| self.aliases.get(key).and_then(|name| self.get(name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Descriptors in load order (descending priority, then declaration).
    pub fn by_priority(&self) -> Vec<&'static FieldAttribute> {
        let mut fields: Vec<_> = self.fields.values().copied().collect();
        fields.sort_by(|a, b| b.priority.cmp(&a.priority));
        fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static FieldAttribute> + '_ {
        self.fields.values().copied()
    }
}

static PLAY_TABLE: Lazy<FieldTable> =
    Lazy::new(|| FieldTable::build(&[BASE_FIELDS, TAGGABLE_FIELDS, BECOME_FIELDS, PLAY_FIELDS]));

static BLOCK_TABLE: Lazy<FieldTable> = Lazy::new(|| {
    FieldTable::build(&[
        BASE_FIELDS,
        CONDITIONAL_FIELDS,
        TAGGABLE_FIELDS,
        BECOME_FIELDS,
        BLOCK_FIELDS,
    ])
});

static TASK_TABLE: Lazy<FieldTable> = Lazy::new(|| {
    FieldTable::build(&[
        BASE_FIELDS,
        CONDITIONAL_FIELDS,
        TAGGABLE_FIELDS,
        BECOME_FIELDS,
        TASK_FIELDS,
    ])
});

/// The descriptor table for an entity kind.
pub fn field_table(kind: EntityKind) -> &'static FieldTable {
    match kind {
        EntityKind::Play => &PLAY_TABLE,
        EntityKind::Block => &BLOCK_TABLE,
        EntityKind::Task => &TASK_TABLE,
    }
}
