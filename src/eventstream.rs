use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::circuit::CircuitBreaker;
use crate::config::Settings;
use crate::registry::Fusebox;
use crate::rolling::{self, LatencyDistribution};

/// Content type served alongside the stream by an HTTP publisher.
pub const CONTENT_TYPE: &str = "text/event-stream";

/// Frames buffered per subscriber before a slow consumer starts losing them.
const SUBSCRIBER_BUFFER: usize = 10;

/// Publishes a per-second snapshot of every live circuit as Server-Sent
/// Events frames, in the wire format the Hystrix dashboard consumes.
///
/// Transport is left to the embedder: `subscribe` hands out a stream of
/// ready-to-write `data:<json>\n\n` frames. Slow subscribers drop frames
/// rather than back up the publisher.
pub struct EventStream {
    fusebox: Fusebox,
    subscribers: Arc<RwLock<Vec<mpsc::Sender<Vec<u8>>>>>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

impl EventStream {
    pub fn new(fusebox: Fusebox) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            fusebox,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            shutdown,
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the publisher loop. Idempotent; must be called within a Tokio
    /// runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let fusebox = self.fusebox.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tick.tick() => publish(&fusebox, &subscribers),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("event stream publisher stopped");
        });
    }

    /// Stops the publisher loop. Subscribers see their stream end.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        self.subscribers.write().clear();
    }

    /// Registers a subscriber and returns its frame stream.
    pub fn subscribe(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.write().push(tx);
        rx
    }
}

fn publish(fusebox: &Fusebox, subscribers: &RwLock<Vec<mpsc::Sender<Vec<u8>>>>) {
    let breakers = fusebox.breakers();
    if breakers.is_empty() {
        return;
    }

    let now = SystemTime::now();
    let all_settings = fusebox.circuit_settings();
    let mut frames = Vec::with_capacity(breakers.len() * 2);
    for breaker in &breakers {
        let settings = all_settings
            .get(breaker.name())
            .cloned()
            .unwrap_or_else(|| Arc::new(Settings::default()));
        if let Some(frame) = frame(&command_payload(breaker, &settings, now)) {
            frames.push(frame);
        }
        if let Some(frame) = frame(&thread_pool_payload(breaker, &settings, now)) {
            frames.push(frame);
        }
    }

    let mut subscribers = subscribers.write();
    subscribers.retain(|tx| !tx.is_closed());
    for tx in subscribers.iter() {
        for frame in &frames {
            // A full buffer means a lagging subscriber; skip, never wait.
            let _ = tx.try_send(frame.clone());
        }
    }
}

/// One `data:<json>\n\n` Server-Sent-Events frame.
fn frame(payload: &impl Serialize) -> Option<Vec<u8>> {
    let json = serde_json::to_vec(payload).ok()?;
    let mut buf = Vec::with_capacity(json.len() + 8);
    buf.extend_from_slice(b"data:");
    buf.extend_from_slice(&json);
    buf.extend_from_slice(b"\n\n");
    Some(buf)
}

fn unix_millis(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Serialize)]
struct CommandMetrics<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    group: &'a str,
    #[serde(rename = "currentTime")]
    current_time: u64,
    #[serde(rename = "reportingHosts")]
    reporting_hosts: u32,
    #[serde(rename = "requestCount")]
    request_count: u64,
    #[serde(rename = "errorCount")]
    error_count: u64,
    #[serde(rename = "errorPercentage")]
    error_percentage: u32,
    #[serde(rename = "isCircuitBreakerOpen")]
    is_circuit_breaker_open: bool,
    #[serde(rename = "rollingCountSuccess")]
    rolling_count_success: u64,
    #[serde(rename = "rollingCountFailure")]
    rolling_count_failure: u64,
    #[serde(rename = "rollingCountThreadPoolRejected")]
    rolling_count_thread_pool_rejected: u64,
    #[serde(rename = "rollingCountShortCircuited")]
    rolling_count_short_circuited: u64,
    #[serde(rename = "rollingCountTimeout")]
    rolling_count_timeout: u64,
    #[serde(rename = "rollingCountFallbackSuccess")]
    rolling_count_fallback_success: u64,
    #[serde(rename = "rollingCountFallbackFailure")]
    rolling_count_fallback_failure: u64,
    #[serde(rename = "currentConcurrentExecutionCount")]
    current_concurrent_execution_count: u64,
    #[serde(rename = "latencyExecute_mean")]
    latency_execute_mean: u32,
    #[serde(rename = "latencyExecute")]
    latency_execute: LatencyDistribution,
    #[serde(rename = "latencyTotal_mean")]
    latency_total_mean: u32,
    #[serde(rename = "latencyTotal")]
    latency_total: LatencyDistribution,
    #[serde(rename = "propertyValue_circuitBreakerRequestVolumeThreshold")]
    property_request_volume_threshold: u64,
    #[serde(rename = "propertyValue_circuitBreakerSleepWindowInMilliseconds")]
    property_sleep_window_ms: u64,
    #[serde(rename = "propertyValue_circuitBreakerErrorThresholdPercentage")]
    property_error_threshold_percentage: u32,
    #[serde(rename = "propertyValue_circuitBreakerForceOpen")]
    property_force_open: bool,
    #[serde(rename = "propertyValue_circuitBreakerForceClosed")]
    property_force_closed: bool,
    #[serde(rename = "propertyValue_circuitBreakerEnabled")]
    property_enabled: bool,
    #[serde(rename = "propertyValue_executionIsolationSemaphoreMaxConcurrentRequests")]
    property_max_concurrent_requests: u64,
    #[serde(rename = "propertyValue_metricsRollingStatisticalWindowInMilliseconds")]
    property_rolling_window_ms: u64,
}

fn command_payload<'a>(
    breaker: &'a Arc<CircuitBreaker>,
    settings: &Settings,
    now: SystemTime,
) -> CommandMetrics<'a> {
    let collector = breaker.metrics().default_collector();
    CommandMetrics {
        record_type: "HystrixCommand",
        name: breaker.name(),
        group: breaker.name(),
        current_time: unix_millis(now),
        reporting_hosts: 1,
        request_count: collector.requests().sum(now),
        error_count: collector.errors().sum(now),
        error_percentage: breaker.metrics().error_percent(now),
        is_circuit_breaker_open: breaker.is_open(),
        rolling_count_success: collector.successes().sum(now),
        rolling_count_failure: collector.failures().sum(now),
        rolling_count_thread_pool_rejected: collector.rejects().sum(now),
        rolling_count_short_circuited: collector.short_circuits().sum(now),
        rolling_count_timeout: collector.timeouts().sum(now),
        rolling_count_fallback_success: collector.fallback_successes().sum(now),
        rolling_count_fallback_failure: collector.fallback_failures().sum(now),
        current_concurrent_execution_count: breaker.pool().active_count() as u64,
        latency_execute_mean: collector.run_duration().mean(),
        latency_execute: collector.run_duration().timings(),
        latency_total_mean: collector.total_duration().mean(),
        latency_total: collector.total_duration().timings(),
        property_request_volume_threshold: settings.request_volume_threshold,
        property_sleep_window_ms: settings.sleep_window.as_millis() as u64,
        property_error_threshold_percentage: settings.error_percent_threshold,
        property_force_open: settings.force_open,
        property_force_closed: settings.force_closed,
        property_enabled: !settings.circuit_breaker_disabled,
        property_max_concurrent_requests: settings.max_concurrent_requests as u64,
        property_rolling_window_ms: rolling::number::WINDOW_SECONDS * 1000,
    }
}

#[derive(Serialize)]
struct ThreadPoolMetrics<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    #[serde(rename = "currentTime")]
    current_time: u64,
    #[serde(rename = "reportingHosts")]
    reporting_hosts: u32,
    #[serde(rename = "currentActiveCount")]
    current_active_count: u64,
    #[serde(rename = "currentMaximumPoolSize")]
    current_maximum_pool_size: u64,
    #[serde(rename = "rollingMaxActiveThreads")]
    rolling_max_active_threads: u64,
    #[serde(rename = "rollingCountThreadsExecuted")]
    rolling_count_threads_executed: u64,
}

fn thread_pool_payload<'a>(
    breaker: &'a Arc<CircuitBreaker>,
    settings: &Settings,
    now: SystemTime,
) -> ThreadPoolMetrics<'a> {
    let pool = breaker.pool();
    ThreadPoolMetrics {
        record_type: "HystrixThreadPool",
        name: pool.name(),
        current_time: unix_millis(now),
        reporting_hosts: 1,
        current_active_count: pool.active_count() as u64,
        current_maximum_pool_size: settings.max_concurrent_requests as u64,
        rolling_max_active_threads: pool.metrics().max_active_requests().max(now),
        rolling_count_threads_executed: pool.metrics().executed().sum(now),
    }
}
