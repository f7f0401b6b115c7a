use super::types::{FieldDefinition, FieldKind, Relation, SchemaNode};
use crate::error::{KfgError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a schema YAML file into a SchemaNode tree.
pub fn parse_schema(path: &Path) -> Result<SchemaNode> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a SchemaNode tree.
///
/// A mapping is a leaf iff it carries a recognized `type` marker (or a
/// `many`/`join` relation marker); otherwise it is a namespace and every
/// entry is recursed into.
pub fn parse_schema_str(content: &str) -> Result<SchemaNode> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    parse_node("", &value)
}

fn parse_node(path: &str, value: &serde_yaml::Value) -> Result<SchemaNode> {
    let mapping = match value.as_mapping() {
        Some(m) => m,
        None => {
            return Err(KfgError::Schema(format!(
                "Schema node at '{path}' must be a mapping"
            )))
        }
    };

    if is_leaf(mapping) {
        return Ok(SchemaNode::Leaf(parse_leaf(path, mapping)?));
    }

    let mut children = BTreeMap::new();
    for (key, child) in mapping {
        let name = key.as_str().ok_or_else(|| {
            KfgError::Schema(format!("Schema key at '{path}' must be a string"))
        })?;
        let child_path = if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}.{name}")
        };
        children.insert(name.to_string(), parse_node(&child_path, child)?);
    }
    Ok(SchemaNode::Namespace(children))
}

fn is_leaf(mapping: &serde_yaml::Mapping) -> bool {
    if let Some(kind) = mapping.get(serde_yaml::Value::String("type".into())) {
        if kind.as_str().map(|s| FieldKind::parse(s).is_some()).unwrap_or(false) {
            return true;
        }
    }
    mapping.contains_key(serde_yaml::Value::String("many".into()))
        || mapping.contains_key(serde_yaml::Value::String("join".into()))
}

fn parse_leaf(path: &str, mapping: &serde_yaml::Mapping) -> Result<FieldDefinition> {
    let get = |name: &str| mapping.get(serde_yaml::Value::String(name.into()));

    let kind = match get("type") {
        Some(v) => {
            let name = v.as_str().ok_or_else(|| {
                KfgError::Schema(format!("Field '{path}': type must be a string"))
            })?;
            Some(FieldKind::parse(name).ok_or_else(|| {
                KfgError::Schema(format!("Field '{path}': unknown type '{name}'"))
            })?)
        }
        None => None,
    };

    let relation = if let Some(target) = get("many") {
        let target = target.as_str().ok_or_else(|| {
            KfgError::Schema(format!("Field '{path}': many must name a collection"))
        })?;
        Some(Relation::Many {
            target: target.to_string(),
        })
    } else if let Some(join) = get("join") {
        let join_map = join.as_mapping().ok_or_else(|| {
            KfgError::Schema(format!("Field '{path}': join must be a mapping"))
        })?;
        let fetch = |name: &str| -> Result<String> {
            join_map
                .get(serde_yaml::Value::String(name.into()))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    KfgError::Schema(format!("Field '{path}': join requires '{name}'"))
                })
        };
        Some(Relation::Join {
            target: fetch("file")?,
            foreign_key: fetch("key")?,
        })
    } else {
        None
    };

    Ok(FieldDefinition {
        kind: kind.or(match &relation {
            Some(Relation::Many { .. }) => Some(FieldKind::Array),
            _ => None,
        }),
        default: get("default").map(yaml_to_json),
        important: get("important").and_then(|v| v.as_bool()).unwrap_or(false),
        key: get("key").and_then(|v| v.as_str()).map(|s| s.to_string()),
        description: get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        relation,
        refines: Vec::new(),
    })
}

/// Convert a serde_yaml::Value to serde_json::Value.
pub fn yaml_to_json(yaml: &serde_yaml::Value) -> serde_json::Value {
    match yaml {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::Number(i.into())
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Null
            }
        }
        serde_yaml::Value::String(s) => serde_json::Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => {
            serde_json::Value::Array(seq.iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    out.insert(key.to_string(), yaml_to_json(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}
