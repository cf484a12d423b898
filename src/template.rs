//! Jinja2-style conditionals and templating using minijinja.
//!
//! [`JinjaEvaluator`] is the default [`ConditionalEvaluator`]. Conditionals
//! are bare expressions (`out.rc == 0`, `item is defined`); task arguments
//! may embed `{{ ... }}` templates. Undefined variables are errors, except
//! inside `is defined` style tests.

use minijinja::{Environment, UndefinedBehavior, Value};
use serde_json::Value as JsonValue;

use crate::executor::{ExecutorError, ExecutorResult};
use crate::traits::ConditionalEvaluator;
use crate::vars::Vars;

/// Expression evaluator backed by a shared minijinja environment.
#[derive(Debug)]
pub struct JinjaEvaluator {
    env: Environment<'static>,
}

impl Default for JinjaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl JinjaEvaluator {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        Self::add_filters(&mut env);
        Self::add_tests(&mut env);
        Self { env }
    }

    fn add_filters(env: &mut Environment<'static>) {
        env.add_filter("bool", |value: Value| -> bool {
            match value.as_str() {
                Some(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1" | "y"),
                None => value.is_true(),
            }
        });
        env.add_filter("d", |value: Value, default: Option<Value>| -> Value {
            if value.is_undefined() || value.is_none() {
                default.unwrap_or_else(|| Value::from(""))
            } else {
                value
            }
        });
    }

    /// Result tests: `out is failed`, `out is changed` and friends.
    fn add_tests(env: &mut Environment<'static>) {
        fn flag(value: &Value, key: &str) -> bool {
            value.get_attr(key).map(|v| v.is_true()).unwrap_or(false)
        }
        env.add_test("failed", |value: Value| flag(&value, "failed"));
        env.add_test("failure", |value: Value| flag(&value, "failed"));
        env.add_test("succeeded", |value: Value| !flag(&value, "failed"));
        env.add_test("success", |value: Value| !flag(&value, "failed"));
        env.add_test("changed", |value: Value| flag(&value, "changed"));
        env.add_test("skipped", |value: Value| flag(&value, "skipped"));
    }

    fn context(vars: &Vars) -> Value {
        Value::from_serialize(vars)
    }

    /// Evaluate one conditional.
    pub fn evaluate_one(&self, expr: &str, vars: &Vars) -> ExecutorResult<bool> {
        let expr = expr.trim();
        match expr.to_ascii_lowercase().as_str() {
            "" | "true" | "yes" => return Ok(true),
            "false" | "no" => return Ok(false),
            _ => {}
        }

        if has_template(expr) {
            let rendered = self
                .env
                .render_str(expr, Self::context(vars))
                .map_err(|e| ExecutorError::ConditionError(format!("{}: {}", expr, e)))?;
            return Ok(string_truth(&rendered));
        }

        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| ExecutorError::ConditionError(format!("{}: {}", expr, e)))?;
        let value = compiled
            .eval(Self::context(vars))
            .map_err(|e| ExecutorError::ConditionError(format!("{}: {}", expr, e)))?;
        Ok(value.is_true())
    }

    /// Render one string. A string that is a single `{{ expr }}` keeps the
    /// type of the expression's value.
    pub fn render_string(&self, source: &str, vars: &Vars) -> ExecutorResult<JsonValue> {
        if !has_template(source) {
            return Ok(JsonValue::String(source.to_string()));
        }
        if let Some(inner) = single_expression(source) {
            let compiled = self
                .env
                .compile_expression(inner)
                .map_err(|e| ExecutorError::TemplateError(format!("{}: {}", source, e)))?;
            let value = compiled
                .eval(Self::context(vars))
                .map_err(|e| ExecutorError::TemplateError(format!("{}: {}", source, e)))?;
            // Strict mode only trips on output, so a bare lookup can come back undefined
            if value.is_undefined() {
                return Err(ExecutorError::TemplateError(format!("{}: '{}' is undefined", source, inner)));
            }
            return serde_json::to_value(&value)
                .map_err(|e| ExecutorError::TemplateError(format!("{}: {}", source, e)));
        }
        self.env
            .render_str(source, Self::context(vars))
            .map(JsonValue::String)
            .map_err(|e| ExecutorError::TemplateError(format!("{}: {}", source, e)))
    }
}

impl ConditionalEvaluator for JinjaEvaluator {
    fn evaluate(&self, expressions: &[String], vars: &Vars) -> ExecutorResult<bool> {
        for expr in expressions {
            if !self.evaluate_one(expr, vars)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn render(&self, value: &JsonValue, vars: &Vars) -> ExecutorResult<JsonValue> {
        match value {
            JsonValue::String(s) => self.render_string(s, vars),
            JsonValue::Array(items) => items
                .iter()
                .map(|v| self.render(v, vars))
                .collect::<ExecutorResult<Vec<_>>>()
                .map(JsonValue::Array),
            JsonValue::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render(v, vars)?);
                }
                Ok(JsonValue::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

fn has_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

/// The inner expression of a string made of exactly one `{{ ... }}`.
fn single_expression(source: &str) -> Option<&str> {
    let trimmed = source.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") || inner.contains("{%") {
        return None;
    }
    Some(inner.trim())
}

fn string_truth(s: &str) -> bool {
    !matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "no" | "off" | "0" | "none"
    )
}
