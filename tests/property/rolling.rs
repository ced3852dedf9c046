//! Properties of the sliding-window primitives.

use proptest::prelude::*;
use std::time::{Duration, SystemTime};

use fusebox::rolling::{Number, Timing};

proptest! {
    /// Percentiles never decrease as p grows.
    #[test]
    fn percentile_is_monotonic(
        samples in prop::collection::vec(0u64..5_000, 1..200),
        mut cut_points in prop::collection::vec(0f64..=100.0, 2..8),
    ) {
        let timing = Timing::new();
        for ms in &samples {
            timing.add(Duration::from_millis(*ms));
        }

        cut_points.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let values: Vec<u32> = cut_points.iter().map(|p| timing.percentile(*p)).collect();
        prop_assert!(
            values.windows(2).all(|w| w[0] <= w[1]),
            "percentiles decreased: {cut_points:?} -> {values:?}"
        );
    }

    /// Every percentile is one of the recorded samples.
    #[test]
    fn percentile_returns_a_recorded_sample(
        samples in prop::collection::vec(0u64..5_000, 1..100),
        p in 0f64..=100.0,
    ) {
        let timing = Timing::new();
        for ms in &samples {
            timing.add(Duration::from_millis(*ms));
        }
        let value = timing.percentile(p) as u64;
        prop_assert!(samples.contains(&value), "{value} not in {samples:?}");
    }

    /// The 100th percentile is the maximum and the 0th the minimum.
    #[test]
    fn percentile_extremes_are_min_and_max(
        samples in prop::collection::vec(0u64..5_000, 1..100),
    ) {
        let timing = Timing::new();
        for ms in &samples {
            timing.add(Duration::from_millis(*ms));
        }
        prop_assert_eq!(timing.percentile(0.0) as u64, *samples.iter().min().unwrap());
        prop_assert_eq!(timing.percentile(100.0) as u64, *samples.iter().max().unwrap());
    }

    /// A counter's sum matches what was incremented, and a query far enough
    /// in the future sees nothing: sum only depends on in-window buckets.
    #[test]
    fn counter_sum_is_window_bounded(deltas in prop::collection::vec(1u64..100, 1..50)) {
        let number = Number::new();
        let mut total = 0;
        for delta in &deltas {
            number.increment(*delta);
            total += delta;
        }

        let now = SystemTime::now();
        prop_assert_eq!(number.sum(now), total);
        prop_assert_eq!(number.sum(now + Duration::from_secs(60)), 0);
    }

    /// update_max is idempotent under reordering: the window max equals the
    /// largest submitted value.
    #[test]
    fn counter_max_is_largest_value(values in prop::collection::vec(0u64..10_000, 1..50)) {
        let number = Number::new();
        for value in &values {
            number.update_max(*value);
        }
        prop_assert_eq!(number.max(SystemTime::now()), *values.iter().max().unwrap());
    }
}
