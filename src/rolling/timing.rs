use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::unix_seconds;

/// How far back, in seconds, a [`Timing`] keeps duration samples.
pub const WINDOW_SECONDS: u64 = 60;

/// How long a sorted snapshot stays valid before it is recomputed.
const SNAPSHOT_TTL: Duration = Duration::from_secs(1);

/// The fixed percentile row reported for each latency reservoir.
///
/// Keys match the Hystrix dashboard wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyDistribution {
    #[serde(rename = "0")]
    pub p0: u32,
    #[serde(rename = "25")]
    pub p25: u32,
    #[serde(rename = "50")]
    pub p50: u32,
    #[serde(rename = "75")]
    pub p75: u32,
    #[serde(rename = "90")]
    pub p90: u32,
    #[serde(rename = "95")]
    pub p95: u32,
    #[serde(rename = "99")]
    pub p99: u32,
    #[serde(rename = "99.5")]
    pub p99_5: u32,
    #[serde(rename = "100")]
    pub p100: u32,
}

#[derive(Default)]
struct Snapshot {
    sorted: Vec<Duration>,
    computed_at: Option<Instant>,
}

/// A latency reservoir over a sliding 60-second window of per-second buckets.
///
/// Percentile queries sort the in-window samples; the sorted snapshot is
/// cached for up to one second so a burst of queries (e.g. building the
/// dashboard percentile row) sorts once.
#[derive(Default)]
pub struct Timing {
    buckets: RwLock<HashMap<u64, Vec<Duration>>>,
    snapshot: Mutex<Snapshot>,
}

impl Timing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one duration sample in the current second's bucket.
    pub fn add(&self, duration: Duration) {
        let now = unix_seconds(SystemTime::now());
        let mut buckets = self.buckets.write();
        buckets.entry(now).or_default().push(duration);
        buckets.retain(|ts, _| *ts > now.saturating_sub(WINDOW_SECONDS));
    }

    /// Returns the nearest-rank percentile `p` (0..=100) in whole milliseconds.
    ///
    /// Empty reservoirs report 0.
    pub fn percentile(&self, p: f64) -> u32 {
        self.with_sorted(|sorted| percentile_of(sorted, p))
    }

    /// Returns the truncating arithmetic mean in whole milliseconds, 0 when empty.
    pub fn mean(&self) -> u32 {
        self.with_sorted(|sorted| {
            if sorted.is_empty() {
                return 0;
            }
            let total: Duration = sorted.iter().sum();
            (total.as_millis() / sorted.len() as u128) as u32
        })
    }

    /// Returns the fixed percentile row from a single sorted snapshot.
    pub fn timings(&self) -> LatencyDistribution {
        self.with_sorted(|sorted| LatencyDistribution {
            p0: percentile_of(sorted, 0.0),
            p25: percentile_of(sorted, 25.0),
            p50: percentile_of(sorted, 50.0),
            p75: percentile_of(sorted, 75.0),
            p90: percentile_of(sorted, 90.0),
            p95: percentile_of(sorted, 95.0),
            p99: percentile_of(sorted, 99.0),
            p99_5: percentile_of(sorted, 99.5),
            p100: percentile_of(sorted, 100.0),
        })
    }

    /// Drops all samples and invalidates the cached snapshot.
    pub fn reset(&self) {
        self.buckets.write().clear();
        let mut snapshot = self.snapshot.lock();
        snapshot.sorted.clear();
        snapshot.computed_at = None;
    }

    fn with_sorted<R>(&self, f: impl FnOnce(&[Duration]) -> R) -> R {
        let mut snapshot = self.snapshot.lock();
        let stale = match snapshot.computed_at {
            Some(at) => at.elapsed() >= SNAPSHOT_TTL,
            None => true,
        };
        if stale {
            let now = unix_seconds(SystemTime::now());
            let buckets = self.buckets.read();
            let mut sorted: Vec<Duration> = buckets
                .iter()
                .filter(|(ts, _)| **ts >= now.saturating_sub(WINDOW_SECONDS))
                .flat_map(|(_, samples)| samples.iter().copied())
                .collect();
            drop(buckets);
            sorted.sort_unstable();
            snapshot.sorted = sorted;
            snapshot.computed_at = Some(Instant::now());
        }
        f(&snapshot.sorted)
    }
}

/// Nearest-rank percentile: ordinal `ceil(p/100 * n)`, with `p = 0` mapping
/// to the first sample.
fn percentile_of(sorted: &[Duration], p: f64) -> u32 {
    let n = sorted.len();
    if n == 0 {
        return 0;
    }
    let ordinal = if p <= 0.0 {
        1
    } else {
        ((p / 100.0) * n as f64).ceil() as usize
    };
    let index = ordinal.clamp(1, n) - 1;
    sorted[index].as_millis() as u32
}
