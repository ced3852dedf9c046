use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::StateChange;

/// Callback invoked on every circuit state transition for a command.
pub type StateCallback = dyn Fn(&str, StateChange) + Send + Sync;

/// At most one state callback per command name.
///
/// Callbacks run on a spawned task so a slow observer never blocks the
/// admission path; delivery is at-least-once. A panicking callback is
/// contained, the same way event listeners are elsewhere.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<StateCallback>>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the callback for `name`.
    pub fn register<F>(&self, name: &str, callback: F)
    where
        F: Fn(&str, StateChange) + Send + Sync + 'static,
    {
        self.inner
            .write()
            .insert(name.to_string(), Arc::new(callback));
    }

    pub(crate) fn invoke(&self, name: &str, state: StateChange) {
        let Some(callback) = self.inner.read().get(name).cloned() else {
            return;
        };
        let name = name.to_string();
        // Outside a runtime (e.g. teardown) the transition is not observable;
        // drop it rather than panic.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&name, state)));
            });
        }
    }
}
