use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Leaf field type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
        }
    }

    /// Recognized schema-kind markers. A node carrying one of these as its
    /// `type` is a leaf; anything else is a namespace.
    pub fn parse(name: &str) -> Option<FieldKind> {
        match name {
            "string" => Some(FieldKind::String),
            "number" => Some(FieldKind::Number),
            "boolean" | "bool" => Some(FieldKind::Boolean),
            "object" => Some(FieldKind::Object),
            "array" | "list" => Some(FieldKind::Array),
            _ => None,
        }
    }
}

/// Relation descriptor attached to a schema leaf. Only ids are persisted;
/// resolution happens lazily at read time through the relation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// One-to-many: the leaf holds an array of ids referencing `target`.
    Many { target: String },
    /// One-to-one: `foreign_key` names the sibling field holding the id.
    Join { target: String, foreign_key: String },
}

/// Free-form field validator. Returns Err(message) to reject a value.
#[derive(Clone)]
pub struct Refine(pub Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>);

impl Refine {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Refine(Arc::new(f))
    }
}

impl std::fmt::Debug for Refine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Refine(..)")
    }
}

/// Definition of a single typed field.
#[derive(Debug, Clone, Default)]
pub struct FieldDefinition {
    pub kind: Option<FieldKind>,
    pub default: Option<Value>,
    /// Important fields are required; everything else is optional.
    pub important: bool,
    /// Storage-key override (env driver); defaults to the upper-cased
    /// dotted path with `.` replaced by `_`.
    pub key: Option<String>,
    /// Persisted as a `key:comment` sibling by the JSON driver.
    pub description: Option<String>,
    pub relation: Option<Relation>,
    pub refines: Vec<Refine>,
}

impl FieldDefinition {
    fn of_kind(kind: FieldKind) -> Self {
        FieldDefinition {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn string() -> Self {
        Self::of_kind(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::of_kind(FieldKind::Number)
    }

    pub fn boolean() -> Self {
        Self::of_kind(FieldKind::Boolean)
    }

    pub fn object() -> Self {
        Self::of_kind(FieldKind::Object)
    }

    pub fn array() -> Self {
        Self::of_kind(FieldKind::Array)
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }

    pub fn storage_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Declare a one-to-many relation; the field holds an array of ids.
    pub fn many(mut self, target: &str) -> Self {
        self.kind.get_or_insert(FieldKind::Array);
        self.relation = Some(Relation::Many {
            target: target.to_string(),
        });
        self
    }

    /// Declare a one-to-one relation read from `foreign_key`.
    pub fn join(mut self, target: &str, foreign_key: &str) -> Self {
        self.relation = Some(Relation::Join {
            target: target.to_string(),
            foreign_key: foreign_key.to_string(),
        });
        self
    }

    pub fn refine<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.refines.push(Refine::new(f));
        self
    }
}

/// Schema definition tree. A node is a leaf iff it carries a recognized
/// kind marker; otherwise it is a namespace and is recursed into.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Leaf(FieldDefinition),
    Namespace(BTreeMap<String, SchemaNode>),
}

impl SchemaNode {
    pub fn namespace<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, SchemaNode)>,
    {
        SchemaNode::Namespace(
            entries
                .into_iter()
                .map(|(name, node)| (name.to_string(), node))
                .collect(),
        )
    }

    pub fn leaf(def: FieldDefinition) -> Self {
        SchemaNode::Leaf(def)
    }

    /// Look up the leaf definition at a dotted path.
    pub fn leaf_at(&self, path: &str) -> Option<&FieldDefinition> {
        let mut current = self;
        for segment in path.split('.') {
            match current {
                SchemaNode::Namespace(children) => current = children.get(segment)?,
                SchemaNode::Leaf(_) => return None,
            }
        }
        match current {
            SchemaNode::Leaf(def) => Some(def),
            SchemaNode::Namespace(_) => None,
        }
    }

    /// Flatten into (dotted-path, definition) pairs, namespaces recursed
    /// in key order.
    pub fn leaves(&self) -> Vec<(String, &FieldDefinition)> {
        let mut out = Vec::new();
        self.collect_leaves("", &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a FieldDefinition)>) {
        match self {
            SchemaNode::Leaf(def) => out.push((prefix.to_string(), def)),
            SchemaNode::Namespace(children) => {
                for (name, child) in children {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{prefix}.{name}")
                    };
                    child.collect_leaves(&path, out);
                }
            }
        }
    }
}

/// Auto-id strategy for multimode `create` when the payload carries no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}
