use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::callback::CallbackRegistry;
use crate::circuit::CircuitBreaker;
use crate::collector::{CollectorRegistry, MetricCollector};
use crate::config::{CommandConfig, Settings, SettingsRegistry};
use crate::events::StateChange;

/// The container for a set of named circuits: settings, breakers, pools,
/// metric collectors and state callbacks.
///
/// Cheap to clone; clones share all state. Most applications keep one
/// instance (or use [`crate::global()`]) and address commands by name.
///
/// ```
/// use fusebox::{CommandConfig, Fusebox};
/// use std::time::Duration;
///
/// # async fn example() {
/// let fb = Fusebox::new();
/// fb.configure_command(
///     "inventory",
///     CommandConfig::new()
///         .timeout(Duration::from_millis(250))
///         .max_concurrent_requests(32),
/// );
///
/// let result = fb
///     .execute("inventory", async { Ok::<_, fusebox::BoxError>(()) }, None)
///     .await;
/// assert!(result.is_ok());
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Fusebox {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    settings: SettingsRegistry,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    callbacks: CallbackRegistry,
    collectors: CollectorRegistry,
}

impl Fusebox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies settings for a set of commands.
    pub fn configure<I>(&self, commands: I)
    where
        I: IntoIterator<Item = (String, CommandConfig)>,
    {
        for (name, config) in commands {
            self.configure_command(&name, config);
        }
    }

    /// Applies settings for one command, taking effect on its next
    /// invocation. The previous settings for the name are fully replaced.
    pub fn configure_command(&self, name: &str, config: CommandConfig) {
        self.inner.settings.configure(name, &config);
    }

    /// Returns the circuit for `name`, creating it on first use.
    ///
    /// The boolean reports whether this call created the circuit. Creation
    /// is linearizable: concurrent first uses observe the same instance.
    pub fn get_circuit(&self, name: &str) -> (Arc<CircuitBreaker>, bool) {
        if let Some(breaker) = self.inner.breakers.read().get(name) {
            return (Arc::clone(breaker), false);
        }

        let mut breakers = self.inner.breakers.write();
        // Re-check under the write lock; the first creator wins.
        if let Some(breaker) = breakers.get(name) {
            return (Arc::clone(breaker), false);
        }
        let breaker = Arc::new(CircuitBreaker::new(
            name,
            self.inner.settings.clone(),
            self.inner.callbacks.clone(),
            &self.inner.collectors,
        ));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        (breaker, true)
    }

    /// Forces (or stops forcing) the named circuit open, creating it if
    /// needed.
    pub fn toggle_force_open(&self, name: &str, toggle: bool) {
        let (breaker, _) = self.get_circuit(name);
        breaker.toggle_force_open(toggle);
    }

    /// Drops every circuit after resetting its metrics and pool accounting.
    /// Circuits are recreated lazily on next use.
    pub fn flush(&self) {
        let mut breakers = self.inner.breakers.write();
        for breaker in breakers.values() {
            breaker.metrics().reset();
            breaker.pool().metrics().reset();
        }
        breakers.clear();
    }

    /// Returns a copy of all active settings.
    pub fn circuit_settings(&self) -> HashMap<String, Arc<Settings>> {
        self.inner.settings.snapshot()
    }

    /// Registers the state-change callback for `name`; at most one callback
    /// per command, later registrations replace earlier ones.
    pub fn register_callback<F>(&self, name: &str, callback: F)
    where
        F: Fn(&str, StateChange) + Send + Sync + 'static,
    {
        self.inner.callbacks.register(name, callback);
    }

    /// Registers a metric collector factory, applied to circuits created
    /// after the registration.
    pub fn register_collector<F>(&self, factory: F)
    where
        F: Fn(&str) -> Box<dyn MetricCollector> + Send + Sync + 'static,
    {
        self.inner.collectors.register(factory);
    }

    pub(crate) fn settings_for(&self, name: &str) -> Arc<Settings> {
        self.inner.settings.get(name)
    }

    /// Snapshot of the live circuits, for the event stream publisher.
    pub(crate) fn breakers(&self) -> Vec<Arc<CircuitBreaker>> {
        self.inner.breakers.read().values().cloned().collect()
    }
}
