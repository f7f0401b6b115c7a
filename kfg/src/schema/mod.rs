mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_str, yaml_to_json};
pub use types::{FieldDefinition, FieldKind, IdStrategy, Refine, Relation, SchemaNode};

use crate::error::{KfgError, Result};

/// A flattened leaf with its compiled validation policy.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub path: String,
    pub required: bool,
    pub def: FieldDefinition,
}

/// The Validator's internal representation of a schema definition.
/// Derived, never hand-edited; regenerated on every mount.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub fields: Vec<CompiledField>,
    pub only_importants: bool,
}

impl CompiledSchema {
    /// Compile a schema definition. Every leaf stays compiled in both
    /// modes, so present values are always type-checked and coerced.
    /// With `only_importants`, non-important leaves become fully
    /// optional: they raise no required errors and receive no defaults.
    pub fn compile(schema: &SchemaNode, only_importants: bool) -> Result<CompiledSchema> {
        let leaves = schema.leaves();
        if leaves.is_empty() {
            return Err(KfgError::Schema(
                "Schema compiles to no fields; the root must be a namespace with at least one leaf"
                    .into(),
            ));
        }

        let fields = leaves
            .into_iter()
            .map(|(path, def)| CompiledField {
                path,
                required: def.important,
                def: def.clone(),
            })
            .collect();

        Ok(CompiledSchema {
            fields,
            only_importants,
        })
    }

    pub fn field(&self, path: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|f| f.path == path)
    }
}

/// Storage key for a leaf: the explicit override, or the dotted path
/// upper-cased with `.` replaced by `_` (env-file convention).
pub fn storage_key(path: &str, def: &FieldDefinition) -> String {
    match &def.key {
        Some(key) => key.clone(),
        None => path.to_uppercase().replace('.', "_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> SchemaNode {
        SchemaNode::namespace([
            (
                "app",
                SchemaNode::namespace([
                    (
                        "port",
                        SchemaNode::leaf(
                            FieldDefinition::number().default_value(json!(3000)).important(),
                        ),
                    ),
                    ("host", SchemaNode::leaf(FieldDefinition::string())),
                ]),
            ),
            (
                "token",
                SchemaNode::leaf(FieldDefinition::string().storage_key("API_TOKEN")),
            ),
        ])
    }

    #[test]
    fn test_compile() {
        let compiled = CompiledSchema::compile(&sample(), false).unwrap();
        assert_eq!(compiled.fields.len(), 3);
        assert!(compiled.field("app.port").unwrap().required);
        assert!(!compiled.field("app.host").unwrap().required);
    }

    #[test]
    fn test_compile_only_importants_keeps_all_leaves() {
        let compiled = CompiledSchema::compile(&sample(), true).unwrap();
        assert_eq!(compiled.fields.len(), 3);
        assert!(compiled.only_importants);
        // present values stay type-checked in relaxed mode
        assert!(compiled.field("app.host").is_some());
        assert!(compiled.field("app.port").unwrap().required);
        assert!(!compiled.field("app.host").unwrap().required);
    }

    #[test]
    fn test_compile_empty_schema_fails() {
        let empty = SchemaNode::Namespace(Default::default());
        assert!(CompiledSchema::compile(&empty, false).is_err());
    }

    #[test]
    fn test_storage_key() {
        let schema = sample();
        assert_eq!(
            storage_key("app.port", schema.leaf_at("app.port").unwrap()),
            "APP_PORT"
        );
        assert_eq!(
            storage_key("token", schema.leaf_at("token").unwrap()),
            "API_TOKEN"
        );
    }
}
