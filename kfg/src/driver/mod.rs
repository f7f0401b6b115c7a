// Driver trait + contract wrapper: a uniform operation surface over any
// persistence backend, with capability checks and the onRequest pre-hook.

use crate::error::{KfgError, Result};
use crate::schema::{CompiledSchema, SchemaNode};
use serde_json::{Map, Value};

/// Per-operation view handed to driver hooks. `data` is the engine's
/// Configuration Data; mutating hooks see it with the change already
/// applied and validated. `compiled` is available once the engine has
/// mounted, for drivers that rebuild `data` from storage mid-session.
pub struct DriverContext<'a> {
    pub data: &'a mut Value,
    pub schema: &'a SchemaNode,
    pub compiled: Option<&'a CompiledSchema>,
    pub multimode: bool,
}

/// A pluggable persistence backend.
///
/// Hooks default to a capability error so a missing implementation
/// surfaces as "driver does not implement <operation>" instead of a
/// crash. Lifecycle hooks (`on_mount`, `on_unmount`, `on_request`) and
/// `save` default to no-ops: a driver without them simply mounts empty
/// and writes through.
pub trait Driver: Send {
    fn identify(&self) -> &'static str;

    /// Driver-specific options, merged from constructor defaults and
    /// per-mount overrides.
    fn config(&self) -> &Map<String, Value>;
    fn config_mut(&mut self) -> &mut Map<String, Value>;

    fn on_mount(&mut self, _ctx: &mut DriverContext) -> Result<()> {
        Ok(())
    }

    fn on_unmount(&mut self, _ctx: &mut DriverContext) -> Result<()> {
        Ok(())
    }

    /// Pre-hook run before every data operation (cache-freshness checks).
    fn on_request(&mut self, _ctx: &mut DriverContext) -> Result<()> {
        Ok(())
    }

    fn on_get(&mut self, _ctx: &mut DriverContext, _path: &str) -> Result<Option<Value>> {
        Err(self.unimplemented("get"))
    }

    fn on_has(&mut self, _ctx: &mut DriverContext, _path: &str) -> Result<bool> {
        Err(self.unimplemented("has"))
    }

    fn on_update(&mut self, _ctx: &mut DriverContext, _path: &str, _value: &Value) -> Result<()> {
        Err(self.unimplemented("update"))
    }

    fn on_delete(&mut self, _ctx: &mut DriverContext, _path: &str) -> Result<()> {
        Err(self.unimplemented("delete"))
    }

    fn on_create(&mut self, _ctx: &mut DriverContext, _id: &str, _record: &Value) -> Result<()> {
        Err(self.unimplemented("create"))
    }

    fn on_merge(&mut self, _ctx: &mut DriverContext, _path: &str, _merged: &Value) -> Result<()> {
        Err(self.unimplemented("insert"))
    }

    fn on_inject(&mut self, _ctx: &mut DriverContext, _partial: &Value) -> Result<()> {
        Err(self.unimplemented("inject"))
    }

    fn on_to_json(&mut self, _ctx: &mut DriverContext) -> Result<Value> {
        Err(self.unimplemented("toJSON"))
    }

    fn on_size(&mut self, _ctx: &mut DriverContext) -> Result<usize> {
        Err(self.unimplemented("size"))
    }

    /// Flush deferred writes. Write-through drivers have nothing to do.
    fn save(&mut self, _ctx: &mut DriverContext) -> Result<()> {
        Ok(())
    }

    #[doc(hidden)]
    fn unimplemented(&self, operation: &str) -> KfgError {
        KfgError::Capability {
            driver: self.identify().to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Uniform adapter around a Driver: merges mount options into the driver
/// config, sequences `on_request` before every data operation, and owns
/// the boxed driver exclusively for one engine.
pub struct DriverContract {
    driver: Box<dyn Driver>,
}

impl DriverContract {
    pub fn new(driver: Box<dyn Driver>) -> Self {
        DriverContract { driver }
    }

    pub fn identify(&self) -> &'static str {
        self.driver.identify()
    }

    pub fn config(&self) -> &Map<String, Value> {
        self.driver.config()
    }

    /// Merge `opts` into the driver config, then run `on_mount`.
    pub fn mount(&mut self, ctx: &mut DriverContext, opts: &Map<String, Value>) -> Result<()> {
        for (key, value) in opts {
            self.driver.config_mut().insert(key.clone(), value.clone());
        }
        self.driver.on_mount(ctx)
    }

    pub fn unmount(&mut self, ctx: &mut DriverContext) -> Result<()> {
        self.driver.on_unmount(ctx)
    }

    pub fn get(&mut self, ctx: &mut DriverContext, path: &str) -> Result<Option<Value>> {
        self.driver.on_request(ctx)?;
        self.driver.on_get(ctx, path)
    }

    pub fn has(&mut self, ctx: &mut DriverContext, path: &str) -> Result<bool> {
        self.driver.on_request(ctx)?;
        self.driver.on_has(ctx, path)
    }

    pub fn set(&mut self, ctx: &mut DriverContext, path: &str, value: &Value) -> Result<()> {
        self.driver.on_request(ctx)?;
        self.driver.on_update(ctx, path, value)
    }

    pub fn del(&mut self, ctx: &mut DriverContext, path: &str) -> Result<()> {
        self.driver.on_request(ctx)?;
        self.driver.on_delete(ctx, path)
    }

    pub fn create(&mut self, ctx: &mut DriverContext, id: &str, record: &Value) -> Result<()> {
        self.driver.on_request(ctx)?;
        self.driver.on_create(ctx, id, record)
    }

    pub fn insert(&mut self, ctx: &mut DriverContext, path: &str, merged: &Value) -> Result<()> {
        self.driver.on_request(ctx)?;
        self.driver.on_merge(ctx, path, merged)
    }

    pub fn inject(&mut self, ctx: &mut DriverContext, partial: &Value) -> Result<()> {
        self.driver.on_request(ctx)?;
        self.driver.on_inject(ctx, partial)
    }

    pub fn to_json(&mut self, ctx: &mut DriverContext) -> Result<Value> {
        self.driver.on_request(ctx)?;
        self.driver.on_to_json(ctx)
    }

    pub fn size(&mut self, ctx: &mut DriverContext) -> Result<usize> {
        self.driver.on_request(ctx)?;
        self.driver.on_size(ctx)
    }

    pub fn save(&mut self, ctx: &mut DriverContext) -> Result<()> {
        self.driver.save(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, SchemaNode};
    use serde_json::json;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct BareDriver {
        config: Map<String, Value>,
        requests: Arc<AtomicUsize>,
    }

    impl BareDriver {
        fn new() -> Self {
            BareDriver {
                config: Map::new(),
                requests: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Driver for BareDriver {
        fn identify(&self) -> &'static str {
            "bare"
        }

        fn config(&self) -> &Map<String, Value> {
            &self.config
        }

        fn config_mut(&mut self) -> &mut Map<String, Value> {
            &mut self.config
        }

        fn on_request(&mut self, _ctx: &mut DriverContext) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_get(&mut self, ctx: &mut DriverContext, path: &str) -> Result<Option<Value>> {
            Ok(crate::util::get_path(ctx.data, path).cloned())
        }
    }

    fn test_schema() -> SchemaNode {
        SchemaNode::namespace([("name", SchemaNode::leaf(FieldDefinition::string()))])
    }

    #[test]
    fn test_unimplemented_hook_is_capability_error() {
        let schema = test_schema();
        let mut data = json!({});
        let mut ctx = DriverContext {
            data: &mut data,
            schema: &schema,
            compiled: None,
            multimode: false,
        };
        let mut contract = DriverContract::new(Box::new(BareDriver::new()));

        let err = contract.set(&mut ctx, "name", &json!("x")).unwrap_err();
        match err {
            KfgError::Capability { driver, operation } => {
                assert_eq!(driver, "bare");
                assert_eq!(operation, "update");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_on_request_runs_before_get() {
        let schema = test_schema();
        let mut data = json!({ "name": "x" });
        let mut ctx = DriverContext {
            data: &mut data,
            schema: &schema,
            compiled: None,
            multimode: false,
        };
        let driver = BareDriver::new();
        let requests = Arc::clone(&driver.requests);
        let mut contract = DriverContract::new(Box::new(driver));

        assert_eq!(contract.get(&mut ctx, "name").unwrap(), Some(json!("x")));
        assert_eq!(requests.load(Ordering::SeqCst), 1);

        // capability failures still go through the pre-hook first
        let _ = contract.size(&mut ctx);
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mount_merges_opts_into_config() {
        let schema = test_schema();
        let mut data = json!({});
        let mut ctx = DriverContext {
            data: &mut data,
            schema: &schema,
            compiled: None,
            multimode: false,
        };
        let mut contract = DriverContract::new(Box::new(BareDriver::new()));

        let mut opts = Map::new();
        opts.insert("path".into(), json!("custom.env"));
        contract.mount(&mut ctx, &opts).unwrap();
        assert_eq!(contract.config().get("path"), Some(&json!("custom.env")));
    }
}
