//! `${name}` placeholder expansion against a flat data context.
//!
//! Placeholders that cannot be resolved are left in the output verbatim;
//! some are meant to be evaluated later by the workload itself.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::HashMap;

static TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid token pattern"));

/// Flat key/value context tokens are resolved against
pub type DataContext = Map<String, Value>;

/// Expand every `${key}` in `input` that has a value in `data`
pub fn replace_tokens(input: &str, data: &DataContext) -> String {
    if !input.contains("${") {
        return input.to_string();
    }

    TOKEN_REGEX
        .replace_all(input, |caps: &Captures| {
            let key = caps[1].trim();
            match data.get(key).and_then(render_value) {
                Some(value) => value,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub fn replace_tokens_in_list(input: &[String], data: &DataContext) -> Vec<String> {
    input.iter().map(|s| replace_tokens(s, data)).collect()
}

pub fn replace_tokens_in_map(
    input: &HashMap<String, String>,
    data: &DataContext,
) -> HashMap<String, String> {
    input
        .iter()
        .map(|(k, v)| (k.clone(), replace_tokens(v, data)))
        .collect()
}

/// Substitute inside a JSON parameter value.
///
/// Strings, arrays of strings and objects whose values are all strings are
/// expanded; anything else is returned unchanged.
pub fn replace_tokens_in_value(input: &Value, data: &DataContext) -> Value {
    match input {
        Value::String(s) => Value::String(replace_tokens(s, data)),
        Value::Array(items) if items.iter().all(Value::is_string) => Value::Array(
            items
                .iter()
                .map(|item| replace_tokens_in_value(item, data))
                .collect(),
        ),
        Value::Object(entries) if entries.values().all(Value::is_string) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), replace_tokens_in_value(v, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // workload variables are stored as {"value": ..., "desc": ...}
        Value::Object(obj) => obj.get("value").and_then(render_value),
        Value::Null | Value::Array(_) => None,
    }
}
