// Hook pipeline: ordered callback chains observing/transforming
// create/update/delete events, plus the ready notification.

use serde_json::Value;

/// Lifecycle events a hook can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Create,
    Update,
    Delete,
    Ready,
}

/// A registered callback. Receives the working payload and, for update,
/// the prior record. A `Some` return replaces the working payload for the
/// next hook in the chain; `None` keeps it unchanged.
pub type Hook = Box<dyn FnMut(&Value, Option<&Value>) -> Option<Value> + Send>;

/// Per-event ordered hook registrations.
#[derive(Default)]
pub struct HookRegistry {
    create: Vec<Hook>,
    update: Vec<Hook>,
    delete: Vec<Hook>,
    ready: Vec<Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Hooks run in registration order.
    pub fn on(&mut self, event: HookEvent, hook: Hook) {
        self.chain_mut(event).push(hook);
    }

    pub fn is_empty(&self, event: HookEvent) -> bool {
        match event {
            HookEvent::Create => self.create.is_empty(),
            HookEvent::Update => self.update.is_empty(),
            HookEvent::Delete => self.delete.is_empty(),
            HookEvent::Ready => self.ready.is_empty(),
        }
    }

    fn chain_mut(&mut self, event: HookEvent) -> &mut Vec<Hook> {
        match event {
            HookEvent::Create => &mut self.create,
            HookEvent::Update => &mut self.update,
            HookEvent::Delete => &mut self.delete,
            HookEvent::Ready => &mut self.ready,
        }
    }

    /// Run a transforming chain. Each hook sees the current payload; a
    /// non-None return becomes the payload for the next hook.
    pub fn run(&mut self, event: HookEvent, payload: Value, prior: Option<&Value>) -> Value {
        let mut working = payload;
        for hook in self.chain_mut(event) {
            if let Some(replacement) = hook(&working, prior) {
                working = replacement;
            }
        }
        working
    }

    /// Fire a pure notification chain (delete observation, ready).
    /// Return values are ignored.
    pub fn notify(&mut self, event: HookEvent, payload: &Value) {
        for hook in self.chain_mut(event) {
            hook(payload, None);
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("create", &self.create.len())
            .field("update", &self.update.len())
            .field("delete", &self.delete.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chain_composes_in_registration_order() {
        let mut registry = HookRegistry::new();
        registry.on(
            HookEvent::Create,
            Box::new(|payload, _| {
                let mut out = payload.clone();
                out["first"] = json!(true);
                Some(out)
            }),
        );
        registry.on(
            HookEvent::Create,
            Box::new(|payload, _| {
                // second hook must observe the first hook's output
                assert_eq!(payload["first"], json!(true));
                let mut out = payload.clone();
                out["second"] = json!(true);
                Some(out)
            }),
        );

        let result = registry.run(HookEvent::Create, json!({ "id": "1" }), None);
        assert_eq!(result, json!({ "id": "1", "first": true, "second": true }));
    }

    #[test]
    fn test_none_return_keeps_payload() {
        let mut registry = HookRegistry::new();
        registry.on(HookEvent::Create, Box::new(|_, _| None));
        registry.on(
            HookEvent::Create,
            Box::new(|payload, _| {
                assert_eq!(payload["id"], json!("1"));
                None
            }),
        );

        let result = registry.run(HookEvent::Create, json!({ "id": "1" }), None);
        assert_eq!(result, json!({ "id": "1" }));
    }

    #[test]
    fn test_update_receives_prior() {
        let mut registry = HookRegistry::new();
        registry.on(
            HookEvent::Update,
            Box::new(|payload, prior| {
                assert_eq!(prior.unwrap()["name"], json!("old"));
                let mut out = payload.clone();
                out["touched"] = json!(true);
                Some(out)
            }),
        );

        let old = json!({ "name": "old" });
        let result = registry.run(HookEvent::Update, json!({ "name": "new" }), Some(&old));
        assert_eq!(result["touched"], json!(true));
    }

    #[test]
    fn test_notify_ignores_returns() {
        let mut registry = HookRegistry::new();
        registry.on(HookEvent::Ready, Box::new(|_, _| Some(json!("ignored"))));
        registry.notify(HookEvent::Ready, &json!(null));
    }
}
