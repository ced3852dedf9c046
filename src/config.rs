use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How long to wait for a run to complete before timing out.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
/// How many executions of the same command may run at the same time.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;
/// Minimum number of requests in the rolling window before the circuit may trip.
pub const DEFAULT_REQUEST_VOLUME_THRESHOLD: u64 = 20;
/// Quiet period after the circuit opens before recovery is probed.
pub const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_millis(5000);
/// Error percentage at or above which the circuit opens.
pub const DEFAULT_ERROR_PERCENT_THRESHOLD: u32 = 50;
/// Extra waiting slots beyond the ticket pool; 0 disables queueing.
pub const DEFAULT_QUEUE_SIZE_REJECTION_THRESHOLD: usize = 0;

/// Runtime tuning for one command. Unset fields resolve to the defaults.
///
/// Durations serialize as integer milliseconds so configs can be loaded from
/// JSON files written for other Hystrix ports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    #[serde(with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_volume_threshold: Option<u64>,
    #[serde(with = "opt_duration_ms", skip_serializing_if = "Option::is_none")]
    pub sleep_window: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_percent_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size_rejection_threshold: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_closed: Option<bool>,
}

impl CommandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hard deadline for a single run.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Size of the ticket pool.
    pub fn max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = Some(max);
        self
    }

    /// Minimum requests in the window before health can trip the circuit.
    pub fn request_volume_threshold(mut self, threshold: u64) -> Self {
        self.request_volume_threshold = Some(threshold);
        self
    }

    /// Quiet period between recovery probes while the circuit is open.
    pub fn sleep_window(mut self, window: Duration) -> Self {
        self.sleep_window = Some(window);
        self
    }

    /// Error percentage (0-100) at which the circuit trips.
    pub fn error_percent_threshold(mut self, threshold: u32) -> Self {
        self.error_percent_threshold = Some(threshold);
        self
    }

    /// Waiting-queue depth beyond the ticket pool.
    pub fn queue_size_rejection_threshold(mut self, size: usize) -> Self {
        self.queue_size_rejection_threshold = Some(size);
        self
    }

    /// Disables admission control for this command; metrics still accrue.
    pub fn circuit_breaker_disabled(mut self, disabled: bool) -> Self {
        self.circuit_breaker_disabled = Some(disabled);
        self
    }

    /// Forces every admission to short-circuit regardless of health.
    pub fn force_open(mut self, force: bool) -> Self {
        self.force_open = Some(force);
        self
    }

    /// Forces every admission to pass; the circuit never trips.
    pub fn force_closed(mut self, force: bool) -> Self {
        self.force_closed = Some(force);
        self
    }
}

/// Resolved, immutable settings snapshot for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub timeout: Duration,
    pub max_concurrent_requests: usize,
    pub request_volume_threshold: u64,
    pub sleep_window: Duration,
    pub error_percent_threshold: u32,
    pub queue_size_rejection_threshold: usize,
    pub circuit_breaker_disabled: bool,
    pub force_open: bool,
    pub force_closed: bool,
}

impl Settings {
    /// Resolves a config patch against the defaults.
    ///
    /// # Panics
    ///
    /// Panics when `force_open` and `force_closed` are both set; holding a
    /// circuit open and closed at once is a programming error and is rejected
    /// at configuration time rather than at the first admission.
    fn from_config(config: &CommandConfig) -> Self {
        let force_open = config.force_open.unwrap_or(false);
        let force_closed = config.force_closed.unwrap_or(false);
        if force_open && force_closed {
            panic!("force_open and force_closed are mutually exclusive");
        }

        Self {
            timeout: config.timeout.unwrap_or(DEFAULT_TIMEOUT),
            max_concurrent_requests: config
                .max_concurrent_requests
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
            request_volume_threshold: config
                .request_volume_threshold
                .unwrap_or(DEFAULT_REQUEST_VOLUME_THRESHOLD),
            sleep_window: config.sleep_window.unwrap_or(DEFAULT_SLEEP_WINDOW),
            error_percent_threshold: config
                .error_percent_threshold
                .unwrap_or(DEFAULT_ERROR_PERCENT_THRESHOLD),
            queue_size_rejection_threshold: config
                .queue_size_rejection_threshold
                .unwrap_or(DEFAULT_QUEUE_SIZE_REJECTION_THRESHOLD),
            circuit_breaker_disabled: config.circuit_breaker_disabled.unwrap_or(false),
            force_open,
            force_closed,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&CommandConfig::default())
    }
}

/// Per-command settings, created with defaults on first reference.
///
/// `configure` fully replaces the named entry; readers always see a complete
/// snapshot, never a partially applied patch.
#[derive(Clone, Default)]
pub struct SettingsRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<Settings>>>>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the settings for `name`, applying defaults for unset fields.
    pub fn configure(&self, name: &str, config: &CommandConfig) {
        let settings = Arc::new(Settings::from_config(config));
        self.inner.write().insert(name.to_string(), settings);
    }

    /// Returns the settings for `name`, creating a default entry if absent.
    pub fn get(&self, name: &str) -> Arc<Settings> {
        if let Some(settings) = self.inner.read().get(name) {
            return Arc::clone(settings);
        }
        let mut map = self.inner.write();
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Settings::default())),
        )
    }

    /// Returns a copy of every configured entry.
    pub fn snapshot(&self) -> HashMap<String, Arc<Settings>> {
        self.inner.read().clone()
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}
