//! Local callbacks the host can reach by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Callback behind a declared function.
///
/// Receives the `arguments` of the inbound call exactly as sent (or `None`
/// when the field was absent) and returns the response payload.
pub type FunctionHandler = Arc<dyn Fn(Option<Value>) -> Value + Send + Sync>;

/// Callback subscribed to a hook.
pub type HookHandler = Arc<dyn Fn() + Send + Sync>;

/// Declared functions, one handler per name.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    /// Handlers keyed by function name.
    functions: HashMap<String, FunctionHandler>,
}

impl FunctionRegistry {
    /// Stores `handler` under `name`, returning the handler it replaced.
    pub(crate) fn insert(&mut self, name: &str, handler: FunctionHandler) -> Option<FunctionHandler> {
        self.functions.insert(name.to_owned(), handler)
    }

    /// Removes the handler for `name`. Returns whether one existed.
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Returns a shared reference to the handler for `name`.
    pub(crate) fn get(&self, name: &str) -> Option<FunctionHandler> {
        self.functions.get(name).map(Arc::clone)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

/// Hook subscriptions; a name may carry any number of handlers.
#[derive(Default)]
pub(crate) struct HookRegistry {
    /// Handlers keyed by hook name, in registration order.
    hooks: HashMap<String, Vec<HookHandler>>,
}

impl HookRegistry {
    /// Appends `handler` to the subscribers of `name`.
    pub(crate) fn add(&mut self, name: &str, handler: HookHandler) {
        self.hooks.entry(name.to_owned()).or_default().push(handler);
    }

    /// Snapshot of the handlers for `name`, in registration order.
    pub(crate) fn handlers(&self, name: &str) -> Vec<HookHandler> {
        self.hooks
            .get(name)
            .map(|hs| hs.iter().map(Arc::clone).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.hooks.iter().map(|(name, hs)| (name, hs.len())))
            .finish()
    }
}
