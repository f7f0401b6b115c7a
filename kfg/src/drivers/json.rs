// JSON-file driver. Single-record mode persists one file, nested or
// flattened ("keyroot") layout; multimode persists one file per record
// under an {id} path pattern. Field descriptions are written as sibling
// keys suffixed ":comment" and stripped on read.

use crate::driver::{Driver, DriverContext};
use crate::error::{KfgError, Result};
use crate::pattern::PathPattern;
use crate::util::{flatten, get_path, set_path, unflatten};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub struct JsonDriver {
    config: Map<String, Value>,
    pattern: Option<PathPattern>,
}

impl JsonDriver {
    /// Single-record driver backed by one JSON file.
    pub fn new(path: &str) -> Self {
        let mut config = Map::new();
        config.insert("path".into(), Value::String(path.to_string()));
        config.insert("keyroot".into(), Value::Bool(false));
        JsonDriver {
            config,
            pattern: None,
        }
    }

    /// Multimode driver: one file per record under `root`, named by an
    /// `{id}` pattern such as `users/{id}.json`.
    pub fn multi(root: &str, pattern: &str) -> Result<Self> {
        let mut config = Map::new();
        config.insert("path".into(), Value::String(root.to_string()));
        config.insert("pattern".into(), Value::String(pattern.to_string()));
        config.insert("keyroot".into(), Value::Bool(false));
        Ok(JsonDriver {
            config,
            pattern: Some(PathPattern::parse(pattern)?),
        })
    }

    /// Flattened layout: dotted keys at the top level of the file.
    pub fn keyroot(mut self) -> Self {
        self.config.insert("keyroot".into(), Value::Bool(true));
        self
    }

    fn is_keyroot(&self) -> bool {
        self.config
            .get("keyroot")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn root(&self) -> PathBuf {
        PathBuf::from(
            self.config
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or("config.json"),
        )
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        let pattern = self.pattern.as_ref().ok_or_else(|| {
            KfgError::Other("json driver has no {id} pattern configured".into())
        })?;
        Ok(self.root().join(pattern.render(id)))
    }

    /// Render one schema-conforming object for disk, adding `:comment`
    /// siblings for described fields.
    fn format(&self, data: &Value, ctx: &DriverContext) -> Value {
        if self.is_keyroot() {
            let mut out = Map::new();
            for (path, value) in flatten(data) {
                if let Some(def) = ctx.schema.leaf_at(&path) {
                    if let Some(description) = &def.description {
                        out.insert(format!("{path}:comment"), Value::String(description.clone()));
                    }
                }
                out.insert(path, value);
            }
            return Value::Object(out);
        }

        let mut out = data.clone();
        for (path, def) in ctx.schema.leaves() {
            let Some(description) = &def.description else {
                continue;
            };
            if get_path(data, &path).is_none() {
                continue;
            }
            let (parent, name) = match path.rsplit_once('.') {
                Some((parent, name)) => (Some(parent), name),
                None => (None, path.as_str()),
            };
            let parent_is_object = match parent {
                Some(parent) => get_path(&out, parent).map(Value::is_object).unwrap_or(false),
                None => out.is_object(),
            };
            if parent_is_object {
                let comment_path = match parent {
                    Some(parent) => format!("{parent}.{name}:comment"),
                    None => format!("{name}:comment"),
                };
                set_path(&mut out, &comment_path, Value::String(description.clone()));
            }
        }
        out
    }

    fn write_file(&self, path: &Path, value: &Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    fn read_file(&self, path: &Path) -> Option<Value> {
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Value>(&text) {
            Ok(mut value) => {
                strip_comments(&mut value);
                if self.is_keyroot() {
                    if let Value::Object(map) = value {
                        return Some(unflatten(map));
                    }
                }
                Some(value)
            }
            Err(err) => {
                // best-effort read: fall back to schema defaults
                log::warn!("malformed JSON in {}: {err}", path.display());
                None
            }
        }
    }

    fn write_record(&self, ctx: &DriverContext, id: &str) -> Result<()> {
        let record = get_path(ctx.data, id)
            .cloned()
            .ok_or_else(|| KfgError::NotFound(id.to_string()))?;
        let path = self.record_path(id)?;
        self.write_file(&path, &self.format(&record, ctx))
    }

    fn write_single(&self, ctx: &DriverContext) -> Result<()> {
        self.write_file(&self.root(), &self.format(ctx.data, ctx))
    }

    fn write_affected(&self, ctx: &DriverContext, path: &str) -> Result<()> {
        if !ctx.multimode {
            return self.write_single(ctx);
        }
        let id = path.split('.').next().unwrap_or(path);
        self.write_record(ctx, id)
    }
}

impl Driver for JsonDriver {
    fn identify(&self) -> &'static str {
        "json"
    }

    fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    fn config_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.config
    }

    fn on_mount(&mut self, ctx: &mut DriverContext) -> Result<()> {
        // per-mount opts may override the pattern
        self.pattern = match self.config.get("pattern").and_then(|v| v.as_str()) {
            Some(pattern) => Some(PathPattern::parse(pattern)?),
            None => None,
        };

        if ctx.multimode != self.pattern.is_some() {
            return Err(KfgError::Other(if ctx.multimode {
                "multimode mount requires an {id} pattern".into()
            } else {
                "an {id} pattern requires a multimode mount".into()
            }));
        }

        if !ctx.multimode {
            *ctx.data = self.read_file(&self.root()).unwrap_or(Value::Object(Map::new()));
            return Ok(());
        }

        let mut records = Map::new();
        let pattern = self.pattern.as_ref().unwrap();
        let root = self.root();
        let glob_expr = format!("{}/{}", root.display(), pattern.glob_pattern());
        let files = glob::glob(&glob_expr)
            .map_err(|e| KfgError::Other(format!("Glob error: {e}")))?
            .filter_map(|r| r.ok());
        for file in files {
            let rel = file
                .strip_prefix(&root)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            let Some(id) = pattern.extract(&rel) else {
                continue;
            };
            if let Some(record) = self.read_file(&file) {
                records.insert(id, record);
            }
        }
        *ctx.data = Value::Object(records);
        Ok(())
    }

    fn on_get(&mut self, ctx: &mut DriverContext, path: &str) -> Result<Option<Value>> {
        Ok(get_path(ctx.data, path).cloned())
    }

    fn on_has(&mut self, ctx: &mut DriverContext, path: &str) -> Result<bool> {
        Ok(matches!(get_path(ctx.data, path), Some(v) if !v.is_null()))
    }

    fn on_update(&mut self, ctx: &mut DriverContext, path: &str, _value: &Value) -> Result<()> {
        self.write_affected(ctx, path)
    }

    fn on_delete(&mut self, ctx: &mut DriverContext, path: &str) -> Result<()> {
        if !ctx.multimode {
            return self.write_single(ctx);
        }
        if path.contains('.') {
            return self.write_affected(ctx, path);
        }
        // whole-record delete removes the backing file
        let file = self.record_path(path)?;
        if file.exists() {
            std::fs::remove_file(file)?;
        }
        Ok(())
    }

    fn on_create(&mut self, ctx: &mut DriverContext, id: &str, _record: &Value) -> Result<()> {
        self.write_record(ctx, id)
    }

    fn on_merge(&mut self, ctx: &mut DriverContext, path: &str, _merged: &Value) -> Result<()> {
        self.write_affected(ctx, path)
    }

    fn on_inject(&mut self, ctx: &mut DriverContext, _partial: &Value) -> Result<()> {
        if !ctx.multimode {
            return self.write_single(ctx);
        }
        let ids: Vec<String> = ctx
            .data
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        for id in ids {
            self.write_record(ctx, &id)?;
        }
        Ok(())
    }

    fn on_to_json(&mut self, ctx: &mut DriverContext) -> Result<Value> {
        Ok(ctx.data.clone())
    }

    fn on_size(&mut self, ctx: &mut DriverContext) -> Result<usize> {
        Ok(ctx.data.as_object().map(|m| m.len()).unwrap_or(0))
    }
}

/// Drop `:comment` sibling keys anywhere in the tree.
fn strip_comments(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|key, _| !key.ends_with(":comment"));
        for child in map.values_mut() {
            strip_comments(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_comments() {
        let mut value = json!({
            "port": 80,
            "port:comment": "listen port",
            "nested": { "x": 1, "x:comment": "c" }
        });
        strip_comments(&mut value);
        assert_eq!(value, json!({ "port": 80, "nested": { "x": 1 } }));
    }

    #[test]
    fn test_read_malformed_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let driver = JsonDriver::new(path.to_str().unwrap());
        assert!(driver.read_file(&path).is_none());
    }

    #[test]
    fn test_keyroot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let driver = JsonDriver::new(path.to_str().unwrap()).keyroot();

        let schema = crate::schema::parse_schema_str(
            "app:\n  port: { type: number, description: listen port }\n",
        )
        .unwrap();
        let mut data = json!({ "app": { "port": 8080 } });
        let ctx = DriverContext {
            data: &mut data,
            schema: &schema,
            compiled: None,
            multimode: false,
        };

        let formatted = driver.format(ctx.data, &ctx);
        driver.write_file(&path, &formatted).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"app.port\""));
        assert!(text.contains("\"app.port:comment\""));

        let read = driver.read_file(&path).unwrap();
        assert_eq!(read, json!({ "app": { "port": 8080 } }));
    }

    #[test]
    fn test_nested_comment_sibling() {
        let schema = crate::schema::parse_schema_str(
            "app:\n  port: { type: number, description: listen port }\n",
        )
        .unwrap();
        let driver = JsonDriver::new("unused.json");
        let mut data = json!({ "app": { "port": 8080 } });
        let ctx = DriverContext {
            data: &mut data,
            schema: &schema,
            compiled: None,
            multimode: false,
        };
        let formatted = driver.format(ctx.data, &ctx);
        assert_eq!(formatted["app"]["port:comment"], json!("listen port"));
    }
}
