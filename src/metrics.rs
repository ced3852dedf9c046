use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::collector::{CollectorRegistry, DefaultCollector, MetricCollector};
use crate::events::{CommandExecution, EventKind};

/// Capacity of the ingest channel. A slow collector backs the channel up;
/// once full, further records are dropped rather than blocking commands.
const CHANNEL_CAPACITY: usize = 2000;

type Collectors = Arc<RwLock<Vec<Box<dyn MetricCollector>>>>;

/// Fan-out point between finished invocations and metric collectors.
///
/// Records enter through a bounded channel and are drained by one consumer
/// task per exchange, which updates every registered collector. Health
/// queries read the default collector directly.
pub struct MetricExchange {
    updates: mpsc::Sender<CommandExecution>,
    default: Arc<DefaultCollector>,
    collectors: Collectors,
}

impl MetricExchange {
    /// Creates the exchange and spawns its consumer task.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn new(name: &str, registry: &CollectorRegistry) -> Self {
        let (updates, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let default = Arc::new(DefaultCollector::new());

        let mut sinks: Vec<Box<dyn MetricCollector>> = vec![Box::new(Arc::clone(&default))];
        sinks.extend(registry.build(name));
        let collectors: Collectors = Arc::new(RwLock::new(sinks));

        tokio::spawn(monitor(rx, Arc::clone(&collectors)));

        Self {
            updates,
            default,
            collectors,
        }
    }

    /// Queues one execution record. Dropped silently when the channel is
    /// full; losing a metric sample must never fail the user's call.
    pub(crate) fn report(&self, execution: CommandExecution) {
        let _ = self.updates.try_send(execution);
    }

    /// Rolling error percentage, rounded to the nearest integer.
    /// 0 when the window holds no requests.
    pub fn error_percent(&self, now: SystemTime) -> u32 {
        let requests = self.default.requests().sum(now);
        let errors = self.default.errors().sum(now);
        if requests == 0 {
            return 0;
        }
        ((errors as f64 / requests as f64) * 100.0 + 0.5) as u32
    }

    pub fn is_healthy(&self, now: SystemTime, error_percent_threshold: u32) -> bool {
        self.error_percent(now) < error_percent_threshold
    }

    /// Resets every collector. Takes the write lock, so in-flight fan-out
    /// finishes before the reset applies.
    pub fn reset(&self) {
        let collectors = self.collectors.write();
        for collector in collectors.iter() {
            collector.reset();
        }
    }

    pub fn default_collector(&self) -> &Arc<DefaultCollector> {
        &self.default
    }
}

async fn monitor(mut rx: mpsc::Receiver<CommandExecution>, collectors: Collectors) {
    while let Some(update) = rx.recv().await {
        let total_duration = update.start.elapsed();
        let collectors = collectors.read();
        for collector in collectors.iter() {
            apply(collector.as_ref(), &update, total_duration);
        }
    }
}

fn apply(
    collector: &dyn MetricCollector,
    update: &CommandExecution,
    total_duration: std::time::Duration,
) {
    let Some(first) = update.types.first() else {
        return;
    };

    match first {
        EventKind::Success => {
            collector.increment_attempts();
            collector.increment_successes();
        }
        EventKind::Failure => {
            collector.increment_attempts();
            collector.increment_errors();
            collector.increment_failures();
        }
        EventKind::Rejected => {
            collector.increment_attempts();
            collector.increment_errors();
            collector.increment_rejects();
        }
        EventKind::ShortCircuit => {
            collector.increment_attempts();
            collector.increment_errors();
            collector.increment_short_circuits();
        }
        EventKind::Timeout => {
            collector.increment_attempts();
            collector.increment_errors();
            collector.increment_timeouts();
        }
        EventKind::ContextCanceled => {
            collector.increment_attempts();
            collector.increment_context_canceled();
        }
        EventKind::ContextDeadlineExceeded => {
            collector.increment_attempts();
            collector.increment_context_deadline_exceeded();
        }
        _ => {}
    }

    for kind in &update.types[1..] {
        match kind {
            EventKind::FallbackSuccess => collector.increment_fallback_successes(),
            EventKind::FallbackFailure => collector.increment_fallback_failures(),
            EventKind::Queued => collector.increment_queued(),
            _ => {}
        }
    }

    collector.update_total_duration(total_duration);
    collector.update_run_duration(update.run_duration);
}
