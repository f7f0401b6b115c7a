// Relation resolution for file-backed entities: "many" (array of ids)
// and "join" (single foreign key) references declared on schema leaves.
// Resolution is lazy and read-only; only ids are ever persisted.

use crate::error::{KfgError, Result};
use crate::pattern::PathPattern;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// A named collection of independently persisted entities that relations
/// can materialize records from.
pub trait EntitySource: Send {
    /// Load the entity with the given id, or None if it does not exist.
    fn open(&self, id: &str) -> Result<Option<Value>>;
}

/// Entity source over one-file-per-record JSON storage, the layout the
/// multimode JSON driver writes.
pub struct JsonFileSource {
    root: PathBuf,
    pattern: PathPattern,
}

impl JsonFileSource {
    pub fn new(root: &str, pattern: &str) -> Result<Self> {
        Ok(JsonFileSource {
            root: PathBuf::from(root),
            pattern: PathPattern::parse(pattern)?,
        })
    }
}

impl EntitySource for JsonFileSource {
    fn open(&self, id: &str) -> Result<Option<Value>> {
        let path = self.root.join(self.pattern.render(id));
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                log::warn!("malformed entity file {}: {err}", path.display());
                Ok(None)
            }
        }
    }
}

/// Registry of entity sources keyed by the collection name relation
/// descriptors refer to.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Box<dyn EntitySource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, source: Box<dyn EntitySource>) {
        self.sources.insert(name.to_string(), source);
    }

    fn source(&self, name: &str) -> Result<&dyn EntitySource> {
        self.sources
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                KfgError::Other(format!("No entity source registered for collection '{name}'"))
            })
    }

    /// Materialize every entity referenced by an id array. Returns None
    /// when the value is not an array. Ids that no longer resolve are
    /// skipped with a warning.
    pub fn resolve_many(&self, target: &str, ids: &Value) -> Result<Option<Vec<Value>>> {
        let ids = match ids.as_array() {
            Some(ids) => ids,
            None => return Ok(None),
        };
        let source = self.source(target)?;
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(id) = id.as_str() else {
                continue;
            };
            match source.open(id)? {
                Some(entity) => entities.push(entity),
                None => log::warn!("dangling relation: {target}/{id} does not exist"),
            }
        }
        Ok(Some(entities))
    }

    /// Materialize the single entity a foreign key points at. An empty or
    /// non-string key resolves to None.
    pub fn resolve_join(&self, target: &str, foreign_key: &Value) -> Result<Option<Value>> {
        let id = match foreign_key.as_str() {
            Some(id) if !id.is_empty() => id,
            _ => return Ok(None),
        };
        self.source(target)?.open(id)
    }
}
