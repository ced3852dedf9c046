//! Sliding-window metric primitives.
//!
//! Commands report into second-granularity buckets; queries aggregate the
//! buckets that fall inside a fixed window ending now. Coarse granularity is
//! intentional: health decisions need trends, not exact ordering, and memory
//! stays bounded at one bucket per in-window second.

pub mod number;
pub mod timing;

pub use number::Number;
pub use timing::{LatencyDistribution, Timing};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, used as the bucket key.
///
/// Wall-clock indexing is acceptable here: a backward clock step trims the
/// window rather than re-ordering samples.
pub(crate) fn unix_seconds(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
