use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::rolling;

/// Sink for per-command execution metrics.
///
/// One collector instance exists per command name per registered factory.
/// Collectors are driven by the metric exchange's consumer task, one record
/// at a time, so implementations only need internal locking if they are
/// shared elsewhere.
pub trait MetricCollector: Send + Sync {
    /// Incremented once for every finished invocation.
    fn increment_attempts(&self);
    /// Incremented for every unsuccessful invocation; attempts minus errors
    /// equals successes within a window.
    fn increment_errors(&self);
    fn increment_successes(&self);
    fn increment_failures(&self);
    /// The invocation was rejected for lack of concurrency tickets.
    fn increment_rejects(&self);
    /// The invocation was rejected because the circuit was open.
    fn increment_short_circuits(&self);
    fn increment_timeouts(&self);
    fn increment_fallback_successes(&self);
    fn increment_fallback_failures(&self);
    fn increment_context_canceled(&self);
    fn increment_context_deadline_exceeded(&self);
    /// The invocation waited in the queue before getting a ticket.
    fn increment_queued(&self);

    /// Wall time from invocation start to finalization.
    fn update_total_duration(&self, duration: Duration);
    /// Time spent inside the user's run function.
    fn update_run_duration(&self, duration: Duration);

    /// Drops all recorded state.
    fn reset(&self);
}

impl<C: MetricCollector + ?Sized> MetricCollector for Arc<C> {
    fn increment_attempts(&self) {
        (**self).increment_attempts()
    }
    fn increment_errors(&self) {
        (**self).increment_errors()
    }
    fn increment_successes(&self) {
        (**self).increment_successes()
    }
    fn increment_failures(&self) {
        (**self).increment_failures()
    }
    fn increment_rejects(&self) {
        (**self).increment_rejects()
    }
    fn increment_short_circuits(&self) {
        (**self).increment_short_circuits()
    }
    fn increment_timeouts(&self) {
        (**self).increment_timeouts()
    }
    fn increment_fallback_successes(&self) {
        (**self).increment_fallback_successes()
    }
    fn increment_fallback_failures(&self) {
        (**self).increment_fallback_failures()
    }
    fn increment_context_canceled(&self) {
        (**self).increment_context_canceled()
    }
    fn increment_context_deadline_exceeded(&self) {
        (**self).increment_context_deadline_exceeded()
    }
    fn increment_queued(&self) {
        (**self).increment_queued()
    }
    fn update_total_duration(&self, duration: Duration) {
        (**self).update_total_duration(duration)
    }
    fn update_run_duration(&self, duration: Duration) {
        (**self).update_run_duration(duration)
    }
    fn reset(&self) {
        (**self).reset()
    }
}

/// The canonical in-process collector backing circuit health checks and the
/// dashboard stream. Always the first collector of every exchange.
#[derive(Default)]
pub struct DefaultCollector {
    requests: rolling::Number,
    errors: rolling::Number,
    successes: rolling::Number,
    failures: rolling::Number,
    rejects: rolling::Number,
    short_circuits: rolling::Number,
    timeouts: rolling::Number,
    fallback_successes: rolling::Number,
    fallback_failures: rolling::Number,
    context_canceled: rolling::Number,
    context_deadline_exceeded: rolling::Number,
    queued: rolling::Number,
    total_duration: rolling::Timing,
    run_duration: rolling::Timing,
}

impl DefaultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> &rolling::Number {
        &self.requests
    }

    pub fn errors(&self) -> &rolling::Number {
        &self.errors
    }

    pub fn successes(&self) -> &rolling::Number {
        &self.successes
    }

    pub fn failures(&self) -> &rolling::Number {
        &self.failures
    }

    pub fn rejects(&self) -> &rolling::Number {
        &self.rejects
    }

    pub fn short_circuits(&self) -> &rolling::Number {
        &self.short_circuits
    }

    pub fn timeouts(&self) -> &rolling::Number {
        &self.timeouts
    }

    pub fn fallback_successes(&self) -> &rolling::Number {
        &self.fallback_successes
    }

    pub fn fallback_failures(&self) -> &rolling::Number {
        &self.fallback_failures
    }

    pub fn context_canceled(&self) -> &rolling::Number {
        &self.context_canceled
    }

    pub fn context_deadline_exceeded(&self) -> &rolling::Number {
        &self.context_deadline_exceeded
    }

    pub fn queued(&self) -> &rolling::Number {
        &self.queued
    }

    pub fn total_duration(&self) -> &rolling::Timing {
        &self.total_duration
    }

    pub fn run_duration(&self) -> &rolling::Timing {
        &self.run_duration
    }
}

impl MetricCollector for DefaultCollector {
    fn increment_attempts(&self) {
        self.requests.increment(1);
    }

    fn increment_errors(&self) {
        self.errors.increment(1);
    }

    fn increment_successes(&self) {
        self.successes.increment(1);
    }

    fn increment_failures(&self) {
        self.failures.increment(1);
    }

    fn increment_rejects(&self) {
        self.rejects.increment(1);
    }

    fn increment_short_circuits(&self) {
        self.short_circuits.increment(1);
    }

    fn increment_timeouts(&self) {
        self.timeouts.increment(1);
    }

    fn increment_fallback_successes(&self) {
        self.fallback_successes.increment(1);
    }

    fn increment_fallback_failures(&self) {
        self.fallback_failures.increment(1);
    }

    fn increment_context_canceled(&self) {
        self.context_canceled.increment(1);
    }

    fn increment_context_deadline_exceeded(&self) {
        self.context_deadline_exceeded.increment(1);
    }

    fn increment_queued(&self) {
        self.queued.increment(1);
    }

    fn update_total_duration(&self, duration: Duration) {
        self.total_duration.add(duration);
    }

    fn update_run_duration(&self, duration: Duration) {
        self.run_duration.add(duration);
    }

    fn reset(&self) {
        self.requests.reset();
        self.errors.reset();
        self.successes.reset();
        self.failures.reset();
        self.rejects.reset();
        self.short_circuits.reset();
        self.timeouts.reset();
        self.fallback_successes.reset();
        self.fallback_failures.reset();
        self.context_canceled.reset();
        self.context_deadline_exceeded.reset();
        self.queued.reset();
        self.total_duration.reset();
        self.run_duration.reset();
    }
}

/// Builds one collector for a newly created command.
pub type CollectorFactory = dyn Fn(&str) -> Box<dyn MetricCollector> + Send + Sync;

/// Ordered list of collector factories, run once per command name when its
/// metric exchange is created. The default collector is implicit and always
/// present; registered factories add sinks after it.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    factories: Arc<RwLock<Vec<Arc<CollectorFactory>>>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, factory: F)
    where
        F: Fn(&str) -> Box<dyn MetricCollector> + Send + Sync + 'static,
    {
        self.factories.write().push(Arc::new(factory));
    }

    pub(crate) fn build(&self, name: &str) -> Vec<Box<dyn MetricCollector>> {
        self.factories
            .read()
            .iter()
            .map(|factory| factory(name))
            .collect()
    }
}

/// Publishes command events to the `metrics` crate facade, for embedders
/// that already ship a Prometheus or StatsD exporter.
#[cfg(feature = "metrics")]
pub struct FacadeCollector {
    name: String,
}

#[cfg(feature = "metrics")]
impl FacadeCollector {
    pub fn new(name: impl Into<String>) -> Self {
        static DESCRIBE: std::sync::Once = std::sync::Once::new();
        DESCRIBE.call_once(|| {
            metrics::describe_counter!(
                "fusebox_events_total",
                "Command execution events by circuit and event kind"
            );
            metrics::describe_histogram!(
                "fusebox_run_duration_seconds",
                "Time spent inside command run functions"
            );
            metrics::describe_histogram!(
                "fusebox_total_duration_seconds",
                "Wall time from command start to finalization"
            );
        });
        Self { name: name.into() }
    }

    /// Factory suitable for [`CollectorRegistry::register`].
    pub fn factory() -> impl Fn(&str) -> Box<dyn MetricCollector> + Send + Sync + 'static {
        |name| Box::new(FacadeCollector::new(name))
    }

    fn count(&self, event: &'static str) {
        metrics::counter!(
            "fusebox_events_total",
            "circuit" => self.name.clone(),
            "event" => event
        )
        .increment(1);
    }
}

#[cfg(feature = "metrics")]
impl MetricCollector for FacadeCollector {
    fn increment_attempts(&self) {
        self.count("attempt");
    }

    fn increment_errors(&self) {
        self.count("error");
    }

    fn increment_successes(&self) {
        self.count("success");
    }

    fn increment_failures(&self) {
        self.count("failure");
    }

    fn increment_rejects(&self) {
        self.count("rejected");
    }

    fn increment_short_circuits(&self) {
        self.count("short-circuit");
    }

    fn increment_timeouts(&self) {
        self.count("timeout");
    }

    fn increment_fallback_successes(&self) {
        self.count("fallback-success");
    }

    fn increment_fallback_failures(&self) {
        self.count("fallback-failure");
    }

    fn increment_context_canceled(&self) {
        self.count("context-canceled");
    }

    fn increment_context_deadline_exceeded(&self) {
        self.count("context-deadline-exceeded");
    }

    fn increment_queued(&self) {
        self.count("queued");
    }

    fn update_total_duration(&self, duration: Duration) {
        metrics::histogram!("fusebox_total_duration_seconds", "circuit" => self.name.clone())
            .record(duration.as_secs_f64());
    }

    fn update_run_duration(&self, duration: Duration) {
        metrics::histogram!("fusebox_run_duration_seconds", "circuit" => self.name.clone())
            .record(duration.as_secs_f64());
    }

    fn reset(&self) {}
}
