//! Engine invariants under randomized workloads.

use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fusebox::{BoxError, CommandConfig, Fallback, Fusebox};
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Every invocation records exactly one terminal event: attempts in the
    /// window equal the number of invocations, and the granular terminal
    /// counters add up to the same total.
    #[test]
    fn exactly_one_terminal_event_per_invocation(
        outcomes in prop::collection::vec(any::<bool>(), 1..30),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let fb = Fusebox::new();
            // Keep the breaker out of the picture; this is about event counts.
            fb.configure_command(
                "terminal",
                CommandConfig::new().request_volume_threshold(10_000),
            );

            for succeed in &outcomes {
                let succeed = *succeed;
                let _ = fb
                    .execute(
                        "terminal",
                        async move {
                            if succeed {
                                Ok(())
                            } else {
                                Err::<(), BoxError>("down".into())
                            }
                        },
                        None,
                    )
                    .await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;

            let (breaker, _) = fb.get_circuit("terminal");
            let collector = breaker.metrics().default_collector();
            let now = SystemTime::now();
            let expected_successes = outcomes.iter().filter(|s| **s).count() as u64;
            let expected_failures = outcomes.len() as u64 - expected_successes;

            prop_assert_eq!(collector.requests().sum(now), outcomes.len() as u64);
            prop_assert_eq!(collector.successes().sum(now), expected_successes);
            prop_assert_eq!(collector.failures().sum(now), expected_failures);
            Ok(())
        })?;
    }

    /// Tickets are conserved: once every invocation finishes, the pool is
    /// back to full capacity no matter how calls overlapped or failed.
    #[test]
    fn tickets_return_to_the_pool(
        max in 1usize..6,
        calls in 1usize..25,
        fail_every in 2usize..5,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let fb = Fusebox::new();
            fb.configure_command(
                "conserve",
                CommandConfig::new()
                    .max_concurrent_requests(max)
                    .request_volume_threshold(10_000)
                    .timeout(Duration::from_secs(5)),
            );

            let mut handles = Vec::new();
            for i in 0..calls {
                let fail = i % fail_every == 0;
                handles.push(fb.go(
                    "conserve",
                    async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        if fail {
                            Err::<(), BoxError>("down".into())
                        } else {
                            Ok(())
                        }
                    },
                    None,
                ));
            }
            for handle in handles {
                let _ = handle.await;
            }

            let (breaker, _) = fb.get_circuit("conserve");
            prop_assert_eq!(breaker.pool().active_count(), 0);
            Ok(())
        })?;
    }

    /// The fallback runs at most once per invocation, even when rejections
    /// and run failures interleave.
    #[test]
    fn fallback_runs_at_most_once(
        max in 1usize..4,
        calls in 5usize..25,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let fb = Fusebox::new();
            fb.configure_command(
                "fb_once",
                CommandConfig::new()
                    .max_concurrent_requests(max)
                    .request_volume_threshold(10_000)
                    .timeout(Duration::from_secs(5)),
            );

            let fallback_runs = Arc::new(AtomicUsize::new(0));
            let mut handles = Vec::new();
            for _ in 0..calls {
                let counter = Arc::clone(&fallback_runs);
                handles.push(fb.go(
                    "fb_once",
                    async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Err::<(), BoxError>("down".into())
                    },
                    Some(Fallback::new(move |_| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })),
                ));
            }

            let mut completed = 0;
            for handle in handles {
                if handle.await.is_ok() {
                    completed += 1;
                }
            }

            // Every invocation ends in its fallback (run failure or
            // rejection), and each fallback ran exactly once.
            prop_assert_eq!(completed, calls);
            prop_assert_eq!(fallback_runs.load(Ordering::SeqCst), calls);
            Ok(())
        })?;
    }
}
