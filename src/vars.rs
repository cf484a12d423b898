//! Variable scopes.
//!
//! A scope is an ordered string-keyed map of JSON values. Host scopes are
//! layered at dispatch time: inventory vars, then play vars, then facts and
//! registered results, then extra vars.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// An ordered variable scope.
pub type Vars = IndexMap<String, JsonValue>;

/// Overlay `src` on top of `dst`. Later values win.
pub fn merge_vars(dst: &mut Vars, src: &Vars) {
    for (key, value) in src {
        dst.insert(key.clone(), value.clone());
    }
}

/// Convert a YAML value into its JSON counterpart.
///
/// Non-string mapping keys are rendered with their YAML scalar form, and
/// tagged values are unwrapped.
pub fn yaml_to_json(value: &serde_yaml::Value) -> JsonValue {
    match value {
        serde_yaml::Value::Null => JsonValue::Null,
        serde_yaml::Value::Bool(b) => JsonValue::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::from(i)
            } else if let Some(u) = n.as_u64() {
                JsonValue::from(u)
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            } else {
                JsonValue::Null
            }
        }
        serde_yaml::Value::String(s) => JsonValue::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => JsonValue::Array(seq.iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(map) => {
            let obj = map
                .iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect::<serde_json::Map<_, _>>();
            JsonValue::Object(obj)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Render a YAML mapping key as a string.
pub fn yaml_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Convert a JSON object into a scope. Non-objects produce an empty scope.
pub fn vars_from_json(value: &JsonValue) -> Vars {
    match value {
        JsonValue::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Vars::new(),
    }
}

/// Parse a `key=value` extra-var string; values are read as YAML scalars.
pub fn parse_extra_var(raw: &str) -> Option<(String, JsonValue)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let parsed = serde_yaml::from_str::<serde_yaml::Value>(value)
        .map(|v| yaml_to_json(&v))
        .unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Some((key.to_string(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_later_wins() {
        let mut base = Vars::new();
        base.insert("a".into(), json!(1));
        base.insert("b".into(), json!(2));
        let mut over = Vars::new();
        over.insert("b".into(), json!(3));
        merge_vars(&mut base, &over);
        assert_eq!(base["a"], json!(1));
        assert_eq!(base["b"], json!(3));
    }

    #[test]
    fn test_yaml_to_json_nested() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("a: [1, two, {c: true}]\n1: x").unwrap();
        let json = yaml_to_json(&yaml);
        assert_eq!(json, json!({"a": [1, "two", {"c": true}], "1": "x"}));
    }

    #[test]
    fn test_yaml_mapping_keeps_key_order() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("zeta: 1\nmid: 2\nalpha: 3\n").unwrap();
        let json = yaml_to_json(&yaml);
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "mid", "alpha"]);
    }

    #[test]
    fn test_parse_extra_var() {
        assert_eq!(parse_extra_var("port=8080"), Some(("port".into(), json!(8080))));
        assert_eq!(parse_extra_var("name=web"), Some(("name".into(), json!("web"))));
        assert_eq!(parse_extra_var("=oops"), None);
        assert_eq!(parse_extra_var("novalue"), None);
    }
}
