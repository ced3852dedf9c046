use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::callback::CallbackRegistry;
use crate::collector::CollectorRegistry;
use crate::config::SettingsRegistry;
use crate::events::{CommandExecution, EventKind, StateChange};
use crate::metrics::MetricExchange;
use crate::pool::ExecutorPool;

#[derive(Debug, Default)]
struct Flags {
    open: bool,
    force_open: bool,
}

/// Per-command admission gate driven by rolling health metrics.
///
/// The breaker is closed until the rolling error percentage crosses the
/// configured threshold (with at least `request_volume_threshold` requests
/// in the window), open for `sleep_window` afterwards, and then admits a
/// single probe at a time until one succeeds. Health is evaluated lazily on
/// the admission path; there is no background evaluator.
pub struct CircuitBreaker {
    name: String,
    flags: RwLock<Flags>,
    /// Nanoseconds since `epoch`; written when the circuit opens and
    /// compare-and-swapped by probe candidates, so exactly one caller wins
    /// each probe slot.
    opened_or_last_tested: AtomicU64,
    epoch: Instant,
    settings: SettingsRegistry,
    callbacks: CallbackRegistry,
    metrics: MetricExchange,
    pool: ExecutorPool,
}

impl CircuitBreaker {
    /// Creates the breaker with its metric exchange and executor pool.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn new(
        name: &str,
        settings: SettingsRegistry,
        callbacks: CallbackRegistry,
        collectors: &CollectorRegistry,
    ) -> Self {
        let resolved = settings.get(name);
        Self {
            name: name.to_string(),
            flags: RwLock::new(Flags::default()),
            opened_or_last_tested: AtomicU64::new(0),
            epoch: Instant::now(),
            metrics: MetricExchange::new(name, collectors),
            pool: ExecutorPool::new(name, &resolved),
            settings,
            callbacks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &MetricExchange {
        &self.metrics
    }

    pub fn pool(&self) -> &ExecutorPool {
        &self.pool
    }

    /// Forces (or stops forcing) every admission to short-circuit,
    /// independent of health.
    pub fn toggle_force_open(&self, toggle: bool) {
        self.flags.write().force_open = toggle;
    }

    /// Admission check, called before every execution.
    ///
    /// Returns false when the call must short-circuit. While the circuit is
    /// open and the sleep window has elapsed, exactly one concurrent caller
    /// is admitted as the recovery probe.
    pub fn allow_request(&self) -> bool {
        !self.is_open() || self.allow_single_test()
    }

    /// Whether the circuit is currently open, evaluating health lazily.
    ///
    /// An unhealthy closed circuit transitions to open as a side effect of
    /// this check; concurrent detectors race, but only the first one effects
    /// the transition.
    pub fn is_open(&self) -> bool {
        let settings = self.settings.get(&self.name);
        {
            let flags = self.flags.read();
            if flags.force_open || settings.force_open {
                return true;
            }
            if settings.force_closed {
                return false;
            }
            if flags.open {
                return true;
            }
        }

        let now = SystemTime::now();
        if self.metrics.default_collector().requests().sum(now) < settings.request_volume_threshold
        {
            return false;
        }
        if !self
            .metrics
            .is_healthy(now, settings.error_percent_threshold)
        {
            self.set_open();
            return true;
        }
        false
    }

    /// While open and past the sleep window, admits exactly one probe.
    fn allow_single_test(&self) -> bool {
        {
            let flags = self.flags.read();
            if !flags.open {
                return false;
            }
        }

        let now = self.monotonic_nanos();
        let opened_or_last_tested = self.opened_or_last_tested.load(Ordering::Acquire);
        let sleep_window = self.settings.get(&self.name).sleep_window.as_nanos() as u64;

        if now < opened_or_last_tested.saturating_add(sleep_window) {
            return false;
        }
        if self
            .opened_or_last_tested
            .compare_exchange(opened_or_last_tested, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        info!(circuit = %self.name, "allowing single test to possibly close circuit");
        self.callbacks.invoke(&self.name, StateChange::AllowSingle);
        true
    }

    fn set_open(&self) {
        {
            let mut flags = self.flags.write();
            if flags.open {
                return;
            }
            warn!(circuit = %self.name, "opening circuit");
            self.opened_or_last_tested
                .store(self.monotonic_nanos(), Ordering::Release);
            flags.open = true;
        }
        self.callbacks.invoke(&self.name, StateChange::Open);
    }

    fn set_closed(&self) {
        {
            let mut flags = self.flags.write();
            if !flags.open {
                return;
            }
            info!(circuit = %self.name, "closing circuit");
            flags.open = false;
        }
        self.metrics.reset();
        self.callbacks.invoke(&self.name, StateChange::Close);
    }

    /// Records one finished invocation.
    ///
    /// A leading `Success` reported while the circuit is not closed is the
    /// recovery signal: the circuit closes (resetting its metrics) before
    /// the record reaches the exchange.
    pub fn report_event(&self, types: Vec<EventKind>, start: Instant, run_duration: Duration) {
        if types.is_empty() {
            return;
        }
        if types[0] == EventKind::Success && self.flags.read().open {
            self.set_closed();
        }
        self.metrics.report(CommandExecution {
            types,
            start,
            run_duration,
        });
    }

    fn monotonic_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}
