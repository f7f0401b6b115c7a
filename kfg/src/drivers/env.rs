// Environment-file driver: KEY=VALUE lines, single-record mode only.
// File values override process environment values; both override schema
// defaults (defaults are filled by the validator after mount).

use crate::driver::{Driver, DriverContext};
use crate::error::{KfgError, Result};
use crate::schema::storage_key;
use crate::util::{get_path, set_path};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One line of the backing file, kept so comments and ordering survive a
/// rewrite. Pair values live in Configuration Data, not here.
#[derive(Debug, Clone)]
enum EnvLine {
    Blank,
    Comment(String),
    Pair(String),
}

pub struct EnvDriver {
    config: Map<String, Value>,
    lines: Vec<EnvLine>,
}

impl EnvDriver {
    pub fn new(path: &str) -> Self {
        let mut config = Map::new();
        config.insert("path".into(), Value::String(path.to_string()));
        EnvDriver {
            config,
            lines: Vec::new(),
        }
    }

    fn file_path(&self) -> PathBuf {
        PathBuf::from(
            self.config
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or(".env"),
        )
    }

    /// Collect the current storage pairs from Configuration Data.
    fn pairs_from_data(&self, ctx: &DriverContext) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        for (path, def) in ctx.schema.leaves() {
            match get_path(ctx.data, &path) {
                Some(Value::Null) | None => {}
                Some(value) => {
                    pairs.insert(storage_key(&path, def), stringify(value));
                }
            }
        }
        pairs
    }

    fn write_file(&mut self, ctx: &DriverContext) -> Result<()> {
        let mut pairs = self.pairs_from_data(ctx);
        let mut out = String::new();

        for line in &self.lines {
            match line {
                EnvLine::Blank => out.push('\n'),
                EnvLine::Comment(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                EnvLine::Pair(key) => {
                    // a key no longer present in the data is dropped
                    if let Some(value) = pairs.remove(key) {
                        out.push_str(&format!("{key}={}\n", quote(&value)));
                    }
                }
            }
        }

        // new keys append at the end
        for (key, value) in &pairs {
            out.push_str(&format!("{key}={}\n", quote(value)));
            self.lines.push(EnvLine::Pair(key.clone()));
        }

        std::fs::write(self.file_path(), out)?;
        Ok(())
    }
}

impl Driver for EnvDriver {
    fn identify(&self) -> &'static str {
        "env"
    }

    fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    fn config_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.config
    }

    fn on_mount(&mut self, ctx: &mut DriverContext) -> Result<()> {
        if ctx.multimode {
            return Err(KfgError::Other(
                "env driver stores a single record and cannot mount in multimode".into(),
            ));
        }

        let path = self.file_path();
        let mut file_pairs: BTreeMap<String, String> = BTreeMap::new();
        self.lines.clear();

        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let (lines, pairs) = parse(&text);
            self.lines = lines;
            file_pairs = pairs;
        } else {
            log::debug!("env file {} does not exist; starting empty", path.display());
        }

        *ctx.data = Value::Object(Map::new());
        for (leaf_path, def) in ctx.schema.leaves() {
            let key = storage_key(&leaf_path, def);
            let raw = file_pairs
                .get(&key)
                .cloned()
                .or_else(|| std::env::var(&key).ok());
            if let Some(raw) = raw {
                // raw strings go in as-is; the validator coerces them
                set_path(ctx.data, &leaf_path, Value::String(raw));
            }
        }
        Ok(())
    }

    fn on_get(&mut self, ctx: &mut DriverContext, path: &str) -> Result<Option<Value>> {
        Ok(get_path(ctx.data, path).cloned())
    }

    fn on_has(&mut self, ctx: &mut DriverContext, path: &str) -> Result<bool> {
        Ok(matches!(get_path(ctx.data, path), Some(v) if !v.is_null()))
    }

    fn on_update(&mut self, ctx: &mut DriverContext, _path: &str, _value: &Value) -> Result<()> {
        self.write_file(ctx)
    }

    fn on_delete(&mut self, ctx: &mut DriverContext, _path: &str) -> Result<()> {
        self.write_file(ctx)
    }

    fn on_merge(&mut self, ctx: &mut DriverContext, _path: &str, _merged: &Value) -> Result<()> {
        self.write_file(ctx)
    }

    fn on_inject(&mut self, ctx: &mut DriverContext, _partial: &Value) -> Result<()> {
        self.write_file(ctx)
    }

    fn on_to_json(&mut self, ctx: &mut DriverContext) -> Result<Value> {
        Ok(ctx.data.clone())
    }

    fn on_size(&mut self, ctx: &mut DriverContext) -> Result<usize> {
        Ok(ctx.data.as_object().map(|m| m.len()).unwrap_or(0))
    }
}

/// Parse env text into preserved lines and key/value pairs. `#` starts a
/// full-line comment; inline comments are honored only outside quotes.
fn parse(text: &str) -> (Vec<EnvLine>, BTreeMap<String, String>) {
    let mut lines = Vec::new();
    let mut pairs = BTreeMap::new();

    for raw_line in text.lines() {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            lines.push(EnvLine::Blank);
            continue;
        }
        if trimmed.starts_with('#') {
            lines.push(EnvLine::Comment(raw_line.to_string()));
            continue;
        }
        let Some(eq) = trimmed.find('=') else {
            // not a pair; keep the line verbatim so nothing is lost
            lines.push(EnvLine::Comment(raw_line.to_string()));
            continue;
        };
        let key = trimmed[..eq].trim().to_string();
        let value = parse_value(trimmed[eq + 1..].trim());
        lines.push(EnvLine::Pair(key.clone()));
        pairs.insert(key, value);
    }

    (lines, pairs)
}

fn parse_value(raw: &str) -> String {
    for quote in ['"', '\''] {
        if raw.starts_with(quote) {
            if let Some(end) = raw[1..].find(quote) {
                return raw[1..end + 1].to_string();
            }
        }
    }
    // unquoted: an inline comment starts the rest of the line
    match raw.find('#') {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

/// Quote a value when it contains whitespace, quotes, or `#`.
fn quote(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '#');
    if !needs_quotes {
        return value.to_string();
    }
    if value.contains('"') {
        format!("'{value}'")
    } else {
        format!("\"{value}\"")
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // arrays (and objects) are written as JSON text
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let (_, pairs) = parse("APP_PORT=9090\nAPP_HOST=localhost\n");
        assert_eq!(pairs["APP_PORT"], "9090");
        assert_eq!(pairs["APP_HOST"], "localhost");
    }

    #[test]
    fn test_parse_comments_and_blanks() {
        let text = "# heading\n\nAPP_PORT=9090 # inline\n";
        let (lines, pairs) = parse(text);
        assert_eq!(pairs["APP_PORT"], "9090");
        assert!(matches!(lines[0], EnvLine::Comment(_)));
        assert!(matches!(lines[1], EnvLine::Blank));
    }

    #[test]
    fn test_parse_quoted_values() {
        let (_, pairs) = parse(
            "GREETING=\"hello # not a comment\"\nNAME='single quoted'\n",
        );
        assert_eq!(pairs["GREETING"], "hello # not a comment");
        assert_eq!(pairs["NAME"], "single quoted");
    }

    #[test]
    fn test_quote_rules() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("has space"), "\"has space\"");
        assert_eq!(quote("has#hash"), "\"has#hash\"");
        assert_eq!(quote("has\"quote"), "'has\"quote'");
    }

    #[test]
    fn test_stringify_array_as_json() {
        assert_eq!(stringify(&serde_json::json!(["a", "b"])), "[\"a\",\"b\"]");
        assert_eq!(stringify(&serde_json::json!(42)), "42");
        assert_eq!(stringify(&serde_json::json!(true)), "true");
    }
}
