// Dot-path helpers over serde_json::Value, shared by the engine and drivers.

use serde_json::{Map, Value};

/// Look up a dotted path. Returns None if any segment is missing or
/// traverses a non-object.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed.
/// Overwrites non-object intermediates with objects.
pub fn set_path(value: &mut Value, path: &str, new: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = value;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .unwrap()
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    current
        .as_object_mut()
        .unwrap()
        .insert(segments[segments.len() - 1].to_string(), new);
}

/// Remove a dotted path. Returns the removed value, if any.
pub fn delete_path(value: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = value;
    for segment in &segments[..segments.len() - 1] {
        current = current.as_object_mut()?.get_mut(*segment)?;
    }
    current
        .as_object_mut()?
        .remove(segments[segments.len() - 1])
}

/// Deep-merge `patch` into `base`. Objects merge recursively; everything
/// else (arrays included) replaces wholesale.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_val) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_val) if base_val.is_object() && patch_val.is_object() => {
                        deep_merge(base_val, patch_val);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_val.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// Flatten a value tree into (dotted-path, leaf) pairs. Objects recurse;
/// arrays and scalars are leaves. An empty object flattens to nothing.
pub fn flatten(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into("", value, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&path, val, out);
            }
        }
        other => out.push((prefix.to_string(), other.clone())),
    }
}

/// Rebuild a nested object from (dotted-path, leaf) pairs.
pub fn unflatten<I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut root = Value::Object(Map::new());
    for (path, value) in pairs {
        set_path(&mut root, &path, value);
    }
    root
}

/// Human-readable JSON type name, used in validation messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
