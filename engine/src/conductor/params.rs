//! Step input resolution and patching
//!
//! Inputs may hold back-references of the form `$stepId.field.path` naming a
//! value inside an earlier step's artifact. Resolution never fails: an
//! unresolvable reference is left as the original string so the capability
//! reports a clear input error itself.

use crate::conductor::types::{Artifacts, Step};
use regex::Regex;
use sdk::types::Inputs;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Upper bound on dot-path length for both resolution and patching
pub const MAX_PATH_SEGMENTS: usize = 32;

static BACK_REFERENCE: OnceLock<Regex> = OnceLock::new();

fn back_reference() -> &'static Regex {
    BACK_REFERENCE.get_or_init(|| {
        Regex::new(r"^\$([A-Za-z0-9_\-]+)((?:\.[A-Za-z0-9_\-]+)*)$")
            .expect("Invalid back-reference pattern")
    })
}

/// Split a back-reference into its step id and field path.
pub fn parse_reference(text: &str) -> Option<(&str, Vec<&str>)> {
    let captures = back_reference().captures(text)?;
    let step_id = captures.get(1)?.as_str();
    let path = captures
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split('.')
        .filter(|s| !s.is_empty())
        .collect();
    Some((step_id, path))
}

/// Resolve every back-reference in `inputs` against the artifact store.
pub fn resolve_inputs(inputs: &Inputs, artifacts: &Artifacts) -> Inputs {
    inputs
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, artifacts)))
        .collect()
}

/// Resolve one input value, descending into arrays and objects.
pub fn resolve_value(value: &Value, artifacts: &Artifacts) -> Value {
    match value {
        Value::String(text) => {
            resolve_reference(text, artifacts).unwrap_or_else(|| value.clone())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, artifacts))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, artifacts)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Look a single `$stepId.field.path` reference up, or `None` when any part
/// of it is missing.
pub fn resolve_reference(text: &str, artifacts: &Artifacts) -> Option<Value> {
    let (step_id, path) = parse_reference(text)?;
    if path.len() > MAX_PATH_SEGMENTS {
        return None;
    }

    let mut current = artifacts.get(step_id)?;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Step ids referenced anywhere inside `inputs`, in first-seen order.
pub fn referenced_steps(inputs: &Inputs) -> Vec<String> {
    fn collect(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(text) => {
                if let Some((id, _)) = parse_reference(text) {
                    if !out.iter().any(|seen| seen == id) {
                        out.push(id.to_string());
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| collect(item, out)),
            Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            _ => {}
        }
    }

    let mut out = Vec::new();
    inputs.values().for_each(|v| collect(v, &mut out));
    out
}

/// Set one (possibly nested) input field on `step`, creating intermediate
/// maps as needed, and stamp the step as patched.
///
/// A leading `inputs.` segment is accepted and ignored. Returns `false` and
/// leaves the step untouched when the path is empty or too long.
pub fn apply_patch(step: &mut Step, field_path: &str, value: Value) -> bool {
    let path = field_path.strip_prefix("inputs.").unwrap_or(field_path);
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) || segments.len() > MAX_PATH_SEGMENTS {
        return false;
    }
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut target: &mut Map<String, Value> = &mut step.inputs;
    for segment in parents {
        let slot = target
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        target = match slot {
            Value::Object(map) => map,
            _ => return false,
        };
    }
    target.insert(last.to_string(), value);
    step.patched = true;
    true
}
