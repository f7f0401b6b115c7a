// The engine: single authority over Configuration Data. Binds a schema to
// a driver contract, validates every state transition, and layers record
// semantics and the hook pipeline on top in multimode.

use crate::driver::{Driver, DriverContext, DriverContract};
use crate::error::{KfgError, Result};
use crate::hooks::{Hook, HookEvent, HookRegistry};
use crate::relation::{EntitySource, SourceRegistry};
use crate::schema::{CompiledSchema, IdStrategy, Relation, SchemaNode};
use crate::util::{deep_merge, delete_path, get_path, set_path, type_name};
use crate::validation::validate_and_prepare;
use serde_json::{Map, Value};

/// Per-mount options: driver config overrides plus the relaxed
/// "only important fields" validation mode.
#[derive(Default)]
pub struct MountOptions {
    pub driver: Map<String, Value>,
    pub only_importants: bool,
}

/// Configuration Data plus the bits every driver hook needs to see.
struct EngineState {
    data: Value,
    schema: SchemaNode,
    compiled: Option<CompiledSchema>,
    multimode: bool,
}

impl EngineState {
    fn ctx(&mut self) -> DriverContext<'_> {
        DriverContext {
            data: &mut self.data,
            schema: &self.schema,
            compiled: self.compiled.as_ref(),
            multimode: self.multimode,
        }
    }
}

/// A schema-validated, path-addressable configuration store bound to one
/// persistence driver. The driver is consumed at construction, so two
/// engines never alias in-memory driver state.
pub struct Kfg {
    state: EngineState,
    contract: DriverContract,
    hooks: HookRegistry,
    sources: SourceRegistry,
    id_strategy: Option<IdStrategy>,
    loaded: bool,
}

impl Kfg {
    pub fn new(schema: SchemaNode, driver: Box<dyn Driver>) -> Self {
        Kfg {
            state: EngineState {
                data: Value::Null,
                schema,
                compiled: None,
                multimode: false,
            },
            contract: DriverContract::new(driver),
            hooks: HookRegistry::new(),
            sources: SourceRegistry::new(),
            id_strategy: None,
            loaded: false,
        }
    }

    /// Treat the top level as a collection of independently validated
    /// records keyed by id.
    pub fn multimode(mut self) -> Self {
        self.state.multimode = true;
        self
    }

    /// Generate ids for multimode `create` when the payload has none.
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = Some(strategy);
        self
    }

    /// Register a lifecycle hook. Hooks run in registration order.
    pub fn on(&mut self, event: HookEvent, hook: Hook) {
        self.hooks.on(event, hook);
    }

    /// Register an entity source for relation resolution.
    pub fn register_source(&mut self, name: &str, source: Box<dyn EntitySource>) {
        self.sources.register(name, source);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    pub fn mount(&mut self) -> Result<()> {
        self.mount_with(MountOptions::default())
    }

    /// Compile the schema, mount the driver, then validate whatever it
    /// loaded. The engine is loaded only after validation passes.
    pub fn mount_with(&mut self, opts: MountOptions) -> Result<()> {
        let compiled = CompiledSchema::compile(&self.state.schema, opts.only_importants)?;
        self.state.compiled = Some(compiled);

        self.state.data = Value::Object(Map::new());
        self.contract.mount(&mut self.state.ctx(), &opts.driver)?;

        if let Err(err) = self.validate_current() {
            self.state.data = Value::Null;
            self.state.compiled = None;
            return Err(err);
        }

        self.loaded = true;
        log::debug!("mounted {} driver", self.contract.identify());

        if !self.hooks.is_empty(HookEvent::Ready) {
            let snapshot = self.state.data.clone();
            self.hooks.notify(HookEvent::Ready, &snapshot);
        }
        Ok(())
    }

    /// Flush the driver and discard Configuration Data.
    pub fn unmount(&mut self) -> Result<()> {
        if !self.loaded {
            return Ok(());
        }
        self.contract.unmount(&mut self.state.ctx())?;
        self.state.data = Value::Null;
        self.state.compiled = None;
        self.loaded = false;
        Ok(())
    }

    /// Flush deferred writes (a no-op for write-through drivers).
    pub fn save(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.contract.save(&mut self.state.ctx())
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get(&mut self, path: &str) -> Result<Option<Value>> {
        self.ensure_loaded()?;
        self.contract.get(&mut self.state.ctx(), path)
    }

    /// True only if every given path resolves to a non-null value.
    pub fn has(&mut self, paths: &[&str]) -> Result<bool> {
        self.ensure_loaded()?;
        for path in paths {
            if !self.contract.has(&mut self.state.ctx(), path)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn size(&mut self) -> Result<usize> {
        self.ensure_loaded()?;
        self.contract.size(&mut self.state.ctx())
    }

    /// Deep snapshot of Configuration Data.
    pub fn to_json(&mut self) -> Result<Value> {
        self.ensure_loaded()?;
        self.contract.to_json(&mut self.state.ctx())
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Write a value at a dotted path.
    ///
    /// In multimode, replacing a whole record (`set("<id>", record)`) runs
    /// the update hook chain with `(new, old)` when the record already
    /// exists; partial dotted writes and writes to unknown ids go through
    /// raw. The whole tree is re-validated and rolled back on failure.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        self.ensure_loaded()?;

        let payload = if self.state.multimode && !path.contains('.') {
            match get_path(&self.state.data, path).cloned() {
                Some(old) => self.hooks.run(HookEvent::Update, value, Some(&old)),
                None => value,
            }
        } else {
            value
        };

        let snapshot = self.state.data.clone();
        set_path(&mut self.state.data, path, payload);
        if let Err(err) = self.validate_current() {
            self.state.data = snapshot;
            return Err(err);
        }

        // persist the post-coercion value
        let persisted = get_path(&self.state.data, path)
            .cloned()
            .unwrap_or(Value::Null);
        if let Err(err) = self.contract.set(&mut self.state.ctx(), path, &persisted) {
            self.state.data = snapshot;
            return Err(err);
        }
        Ok(())
    }

    /// Shallow-merge `partial` into the object at `path` and write the
    /// merged object back.
    pub fn insert(&mut self, path: &str, partial: Value) -> Result<()> {
        self.ensure_loaded()?;

        let current = match get_path(&self.state.data, path) {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(KfgError::Structural(format!(
                    "cannot insert into non-object at '{path}' (found {})",
                    type_name(other)
                )))
            }
            None => {
                return Err(KfgError::Structural(format!(
                    "cannot insert into non-object at '{path}' (found nothing)"
                )))
            }
        };
        let partial = match partial {
            Value::Object(map) => map,
            other => {
                return Err(KfgError::Structural(format!(
                    "insert expects an object, got {}",
                    type_name(&other)
                )))
            }
        };

        let mut merged = current;
        for (key, value) in partial {
            merged.insert(key, value);
        }
        let merged = Value::Object(merged);

        let snapshot = self.state.data.clone();
        set_path(&mut self.state.data, path, merged);
        if let Err(err) = self.validate_current() {
            self.state.data = snapshot;
            return Err(err);
        }

        let persisted = get_path(&self.state.data, path)
            .cloned()
            .unwrap_or(Value::Null);
        if let Err(err) = self.contract.insert(&mut self.state.ctx(), path, &persisted) {
            self.state.data = snapshot;
            return Err(err);
        }
        Ok(())
    }

    /// Deep-merge `partial` into the root, for bulk hydration.
    pub fn inject(&mut self, partial: Value) -> Result<()> {
        self.ensure_loaded()?;

        let snapshot = self.state.data.clone();
        deep_merge(&mut self.state.data, &partial);
        if let Err(err) = self.validate_current() {
            self.state.data = snapshot;
            return Err(err);
        }
        if let Err(err) = self.contract.inject(&mut self.state.ctx(), &partial) {
            self.state.data = snapshot;
            return Err(err);
        }
        Ok(())
    }

    /// Remove a path. In multimode, deleting a whole record first fires
    /// the delete hook with the current record. Deleting a missing path
    /// is a no-op.
    ///
    /// For a field with a schema default, the re-validation pass fills
    /// the default back in, so `del` acts as reset-to-default for such
    /// fields rather than leaving a hole.
    pub fn del(&mut self, path: &str) -> Result<()> {
        self.ensure_loaded()?;

        let current = match get_path(&self.state.data, path).cloned() {
            Some(value) => value,
            None => return Ok(()),
        };

        if self.state.multimode && !path.contains('.') {
            self.hooks.notify(HookEvent::Delete, &current);
        }

        let snapshot = self.state.data.clone();
        delete_path(&mut self.state.data, path);
        if let Err(err) = self.validate_current() {
            self.state.data = snapshot;
            return Err(err);
        }
        if let Err(err) = self.contract.del(&mut self.state.ctx(), path) {
            self.state.data = snapshot;
            return Err(err);
        }
        Ok(())
    }

    /// Create a new multimode record. The create hook chain runs first and
    /// may assign or derive fields; the final record must carry an id.
    /// Persists immediately and returns the stored record.
    pub fn create(&mut self, record: Value) -> Result<Value> {
        self.ensure_loaded()?;
        if !self.state.multimode {
            return Err(KfgError::Structural(
                "create is only available in multimode".into(),
            ));
        }
        let mut record = match record {
            Value::Object(_) => record,
            other => {
                return Err(KfgError::Structural(format!(
                    "create expects an object, got {}",
                    type_name(&other)
                )))
            }
        };

        if record.get("id").map(|v| v.is_null()).unwrap_or(true) {
            if let Some(strategy) = self.id_strategy {
                record["id"] = Value::String(strategy.generate());
            }
        }

        let record = self.hooks.run(HookEvent::Create, record, None);

        let id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(KfgError::Structural(
                    "create requires the record to carry an id".into(),
                ))
            }
        };
        // a dotted id would be split by path addressing and nest the record
        if id.contains('.') {
            return Err(KfgError::Structural(format!(
                "record id '{id}' must not contain '.'"
            )));
        }

        let snapshot = self.state.data.clone();
        set_path(&mut self.state.data, &id, record);
        if let Err(err) = self.validate_current() {
            self.state.data = snapshot;
            return Err(err);
        }

        let persisted = get_path(&self.state.data, &id)
            .cloned()
            .unwrap_or(Value::Null);
        if let Err(err) = self.contract.create(&mut self.state.ctx(), &id, &persisted) {
            self.state.data = snapshot;
            return Err(err);
        }
        Ok(persisted)
    }

    /// A thin bound view over one multimode record: get/set/del relative
    /// to the record id. Not a new engine.
    pub fn scope(&mut self, id: &str) -> Scope<'_> {
        Scope {
            engine: self,
            id: id.to_string(),
        }
    }

    // ── Relations ──────────────────────────────────────────────────

    /// Resolve a "many" relation: materialize every entity referenced by
    /// the id array at `path`. None if the field holds no array.
    pub fn get_many(&mut self, path: &str) -> Result<Option<Vec<Value>>> {
        self.ensure_loaded()?;
        let target = match self.relation_at(path)? {
            Relation::Many { target } => target,
            Relation::Join { .. } => {
                return Err(KfgError::Structural(format!(
                    "field at '{path}' declares a join relation, not many"
                )))
            }
        };
        let ids = match self.get(path)? {
            Some(ids) => ids,
            None => return Ok(None),
        };
        self.sources.resolve_many(&target, &ids)
    }

    /// Resolve a "join" relation: open the single entity referenced by the
    /// foreign-key field. None if the foreign key is empty.
    pub fn get_join(&mut self, path: &str) -> Result<Option<Value>> {
        self.ensure_loaded()?;
        let (target, foreign_key) = match self.relation_at(path)? {
            Relation::Join { target, foreign_key } => (target, foreign_key),
            Relation::Many { .. } => {
                return Err(KfgError::Structural(format!(
                    "field at '{path}' declares a many relation, not join"
                )))
            }
        };
        // the foreign key lives beside the join field
        let fk_path = match path.rsplit_once('.') {
            Some((parent, _)) => format!("{parent}.{foreign_key}"),
            None => foreign_key,
        };
        let fk_value = self.get(&fk_path)?.unwrap_or(Value::Null);
        self.sources.resolve_join(&target, &fk_value)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(KfgError::NotLoaded)
        }
    }

    fn validate_current(&mut self) -> Result<()> {
        let state = &mut self.state;
        let compiled = state.compiled.as_ref().ok_or(KfgError::NotLoaded)?;
        validate_and_prepare(compiled, &mut state.data, state.multimode)
    }

    /// Schema-relative relation lookup; in multimode the record id prefix
    /// is stripped first.
    fn relation_at(&self, path: &str) -> Result<Relation> {
        let schema_path = if self.state.multimode {
            match path.split_once('.') {
                Some((_, rest)) => rest,
                None => {
                    return Err(KfgError::Structural(format!(
                        "'{path}' does not name a record field"
                    )))
                }
            }
        } else {
            path
        };
        self.state
            .schema
            .leaf_at(schema_path)
            .and_then(|def| def.relation.clone())
            .ok_or_else(|| {
                KfgError::Structural(format!("no relation declared at '{path}'"))
            })
    }
}

/// Bound-scope convenience view returned by [`Kfg::scope`].
pub struct Scope<'a> {
    engine: &'a mut Kfg,
    id: String,
}

impl Scope<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&mut self, path: &str) -> Result<Option<Value>> {
        let full = format!("{}.{path}", self.id);
        self.engine.get(&full)
    }

    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let full = format!("{}.{path}", self.id);
        self.engine.set(&full, value)
    }

    pub fn del(&mut self, path: &str) -> Result<()> {
        let full = format!("{}.{path}", self.id);
        self.engine.del(&full)
    }

    /// The whole record this scope is bound to.
    pub fn record(&mut self) -> Result<Option<Value>> {
        let id = self.id.clone();
        self.engine.get(&id)
    }
}
