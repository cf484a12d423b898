//! Field descriptors and the tagged-union field store.
//!
//! Every settable field of a play, block or task is described by a
//! [`FieldAttribute`]. The descriptor decides how a raw value is coerced at
//! load time and how the effective value is computed when an entity is
//! resolved against its parent chain.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A string scalar
    String,
    /// A signed integer
    Int,
    /// A floating point number
    Float,
    /// A boolean
    Bool,
    /// A list of values
    List,
    /// A string-keyed mapping
    Map,
    /// Any value, stored untouched
    Any,
}

impl FieldType {
    fn describe(self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Int => "an integer",
            FieldType::Float => "a number",
            FieldType::Bool => "a boolean",
            FieldType::List => "a list",
            FieldType::Map => "a mapping",
            FieldType::Any => "any value",
        }
    }
}

/// A stored field value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<JsonValue>),
    Map(IndexMap<String, JsonValue>),
    Any(JsonValue),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            AttrValue::Any(JsonValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            AttrValue::Float(f) => Some(*f as i64),
            AttrValue::Any(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(f) => Some(*f),
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Any(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Any(v) => v.as_bool(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[JsonValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, JsonValue>> {
        match self {
            AttrValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// `false`, `0`, `""`, an empty collection or `null`. Such values do
    /// not shadow an inherited one.
    pub fn is_zero(&self) -> bool {
        match self {
            AttrValue::String(s) => s.is_empty(),
            AttrValue::Int(i) => *i == 0,
            AttrValue::Float(f) => *f == 0.0,
            AttrValue::Bool(b) => !b,
            AttrValue::List(items) => items.is_empty(),
            AttrValue::Map(map) => map.is_empty(),
            AttrValue::Any(JsonValue::Null) => true,
            AttrValue::Any(JsonValue::Bool(b)) => !b,
            AttrValue::Any(JsonValue::Number(n)) => n.as_f64() == Some(0.0),
            AttrValue::Any(JsonValue::String(s)) => s.is_empty(),
            AttrValue::Any(JsonValue::Array(items)) => items.is_empty(),
            AttrValue::Any(JsonValue::Object(map)) => map.is_empty(),
        }
    }

    /// List items rendered as strings. Scalars become one-element lists.
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            AttrValue::List(items) => items.iter().map(json_to_plain_string).collect(),
            AttrValue::String(s) => vec![s.clone()],
            AttrValue::Int(i) => vec![i.to_string()],
            AttrValue::Float(f) => vec![f.to_string()],
            AttrValue::Bool(b) => vec![b.to_string()],
            AttrValue::Map(_) => Vec::new(),
            AttrValue::Any(JsonValue::Array(items)) => items.iter().map(json_to_plain_string).collect(),
            AttrValue::Any(JsonValue::Null) => Vec::new(),
            AttrValue::Any(other) => vec![json_to_plain_string(other)],
        }
    }

    /// Convert back to a JSON value.
    pub fn to_json(&self) -> JsonValue {
        match self {
            AttrValue::String(s) => JsonValue::String(s.clone()),
            AttrValue::Int(i) => JsonValue::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            AttrValue::Bool(b) => JsonValue::Bool(*b),
            AttrValue::List(items) => JsonValue::Array(items.clone()),
            AttrValue::Map(map) => {
                JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            AttrValue::Any(v) => v.clone(),
        }
    }
}

/// Render a JSON scalar without quotes.
pub fn json_to_plain_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Compile-time default of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    None,
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

/// Declarative descriptor of a settable field.
#[derive(Debug, Clone, Copy)]
pub struct FieldAttribute {
    pub name: &'static str,
    pub field_type: FieldType,
    /// Element type for lists
    pub list_of: Option<FieldType>,
    pub default: FieldDefault,
    pub required: bool,
    /// Whether an unset value falls back to the parent's resolved value
    pub inherit: bool,
    /// Whether the parent's value is combined with the own value
    pub extend: bool,
    /// With `extend`, put the own value before the parent's
    pub prepend: bool,
    /// Load order, higher first
    pub priority: i32,
    pub alias: Option<&'static str>,
    /// Structural keys handled by the loader rather than the field store
    pub skip_load: bool,
}

impl FieldAttribute {
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            list_of: None,
            default: FieldDefault::None,
            required: false,
            inherit: true,
            extend: false,
            prepend: false,
            priority: 0,
            alias: None,
            skip_load: false,
        }
    }

    pub const fn string(name: &'static str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub const fn int(name: &'static str) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub const fn list(name: &'static str) -> Self {
        Self::new(name, FieldType::List)
    }

    pub const fn string_list(name: &'static str) -> Self {
        Self::new(name, FieldType::List).list_of(FieldType::String)
    }

    pub const fn map(name: &'static str) -> Self {
        Self::new(name, FieldType::Map)
    }

    pub const fn list_of(mut self, element: FieldType) -> Self {
        self.list_of = Some(element);
        self
    }

    pub const fn default_str(mut self, value: &'static str) -> Self {
        self.default = FieldDefault::Str(value);
        self
    }

    pub const fn default_int(mut self, value: i64) -> Self {
        self.default = FieldDefault::Int(value);
        self
    }

    pub const fn default_bool(mut self, value: bool) -> Self {
        self.default = FieldDefault::Bool(value);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn no_inherit(mut self) -> Self {
        self.inherit = false;
        self
    }

    pub const fn extend(mut self) -> Self {
        self.extend = true;
        self
    }

    pub const fn prepend(mut self) -> Self {
        self.prepend = true;
        self
    }

    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub const fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    pub const fn skip_load(mut self) -> Self {
        self.skip_load = true;
        self
    }

    /// The descriptor default as a stored value.
    pub fn default_value(&self) -> Option<AttrValue> {
        match self.default {
            FieldDefault::None => None,
            FieldDefault::Bool(b) => Some(AttrValue::Bool(b)),
            FieldDefault::Int(i) => Some(AttrValue::Int(i)),
            FieldDefault::Str(s) => Some(AttrValue::String(s.to_string())),
        }
    }

    /// Coerce a raw value into this field's type.
    ///
    /// `Ok(None)` means the raw value was null and the field stays unset.
    pub fn coerce(&self, raw: &JsonValue) -> Result<Option<AttrValue>> {
        if raw.is_null() {
            return Ok(None);
        }
        let value = match self.field_type {
            FieldType::String => match raw {
                JsonValue::String(s) => AttrValue::String(s.clone()),
                JsonValue::Number(_) | JsonValue::Bool(_) => AttrValue::String(raw.to_string()),
                _ => return Err(self.mismatch(raw)),
            },
            FieldType::Int => AttrValue::Int(coerce_int(raw).ok_or_else(|| self.mismatch(raw))?),
            FieldType::Float => match raw {
                JsonValue::Number(n) => AttrValue::Float(n.as_f64().unwrap_or_default()),
                JsonValue::String(s) => AttrValue::Float(
                    s.trim().parse::<f64>().map_err(|_| self.mismatch(raw))?,
                ),
                _ => return Err(self.mismatch(raw)),
            },
            FieldType::Bool => AttrValue::Bool(coerce_bool(raw).ok_or_else(|| self.mismatch(raw))?),
            FieldType::List => {
                let items = match raw {
                    JsonValue::Array(items) => items.clone(),
                    scalar => vec![scalar.clone()],
                };
                if self.list_of == Some(FieldType::String) {
                    let mut strings = Vec::with_capacity(items.len());
                    for item in &items {
                        match item {
                            JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_) => {
                                strings.push(JsonValue::String(json_to_plain_string(item)))
                            }
                            _ => return Err(self.mismatch(raw)),
                        }
                    }
                    AttrValue::List(strings)
                } else {
                    AttrValue::List(items)
                }
            }
            FieldType::Map => match raw {
                JsonValue::Object(map) => {
                    AttrValue::Map(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                }
                _ => return Err(self.mismatch(raw)),
            },
            FieldType::Any => AttrValue::Any(raw.clone()),
        };
        Ok(Some(value))
    }

    fn mismatch(&self, raw: &JsonValue) -> Error {
        Error::invalid_field(self.name, self.field_type.describe(), raw.to_string())
    }
}

fn coerce_int(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        JsonValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Boolean coercion accepting the YAML 1.1 spellings playbooks use.
pub fn coerce_bool(raw: &JsonValue) -> Option<bool> {
    match raw {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => n.as_i64().map(|i| i != 0),
        JsonValue::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "true" | "on" | "y" | "1" => Some(true),
            "no" | "false" | "off" | "n" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Combine an own value with a parent's for an extending field.
///
/// Lists are concatenated parent-first (own-first with `prepend`), keeping
/// the first occurrence of duplicates. Maps take the parent's entries and
/// let the own entries override them.
pub fn extend_value(
    own: Option<AttrValue>,
    parent: Option<AttrValue>,
    prepend: bool,
) -> Option<AttrValue> {
    match (own, parent) {
        (None, None) => None,
        (Some(v), None) | (None, Some(v)) => Some(v),
        (Some(AttrValue::List(own)), Some(AttrValue::List(parent))) => {
            let (first, second) = if prepend { (own, parent) } else { (parent, own) };
            let mut combined: Vec<JsonValue> = Vec::with_capacity(first.len() + second.len());
            for item in first.into_iter().chain(second) {
                if !combined.contains(&item) {
                    combined.push(item);
                }
            }
            Some(AttrValue::List(combined))
        }
        (Some(AttrValue::Map(own)), Some(AttrValue::Map(parent))) => {
            let mut merged = parent;
            for (k, v) in own {
                merged.insert(k, v);
            }
            Some(AttrValue::Map(merged))
        }
        (Some(own), Some(_)) => Some(own),
    }
}

/// Own (unresolved) values of one entity, keyed by canonical field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldStore {
    values: IndexMap<&'static str, AttrValue>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &'static str, value: AttrValue) {
        self.values.insert(name, value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&&'static str, &AttrValue)> {
        self.values.iter()
    }
}
