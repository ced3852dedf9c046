use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::unix_seconds;

/// How far back, in seconds, a [`Number`] aggregates.
pub const WINDOW_SECONDS: u64 = 10;

/// A counter over a sliding 10-second window of per-second buckets.
///
/// Mutations land in the bucket for the current second and evict buckets that
/// have fallen out of the window, so memory is bounded by the window length.
#[derive(Debug, Default)]
pub struct Number {
    buckets: RwLock<HashMap<u64, u64>>,
}

impl Number {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the current second's bucket.
    pub fn increment(&self, delta: u64) {
        let now = unix_seconds(SystemTime::now());
        let mut buckets = self.buckets.write();
        *buckets.entry(now).or_insert(0) += delta;
        remove_old_buckets(&mut buckets, now);
    }

    /// Raises the current second's bucket to `value` if it is larger.
    ///
    /// Used for gauges sampled per event, e.g. the peak number of active
    /// requests observed in a second.
    pub fn update_max(&self, value: u64) {
        let now = unix_seconds(SystemTime::now());
        let mut buckets = self.buckets.write();
        let cell = buckets.entry(now).or_insert(0);
        if value > *cell {
            *cell = value;
        }
        remove_old_buckets(&mut buckets, now);
    }

    /// Sums the buckets inside the window ending at `now`.
    pub fn sum(&self, now: SystemTime) -> u64 {
        let now = unix_seconds(now);
        let buckets = self.buckets.read();
        buckets
            .iter()
            .filter(|(ts, _)| **ts >= now.saturating_sub(WINDOW_SECONDS))
            .map(|(_, value)| value)
            .sum()
    }

    /// Returns the largest bucket value inside the window ending at `now`.
    pub fn max(&self, now: SystemTime) -> u64 {
        let now = unix_seconds(now);
        let buckets = self.buckets.read();
        buckets
            .iter()
            .filter(|(ts, _)| **ts >= now.saturating_sub(WINDOW_SECONDS))
            .map(|(_, value)| *value)
            .max()
            .unwrap_or(0)
    }

    /// Returns the per-second average over the window ending at `now`.
    pub fn avg(&self, now: SystemTime) -> f64 {
        self.sum(now) as f64 / WINDOW_SECONDS as f64
    }

    /// Drops all buckets.
    pub fn reset(&self) {
        self.buckets.write().clear();
    }
}

fn remove_old_buckets(buckets: &mut HashMap<u64, u64>, now: u64) {
    buckets.retain(|ts, _| *ts > now.saturating_sub(WINDOW_SECONDS));
}
