use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fusebox::{BoxError, CommandConfig, Fusebox, StateChange};

#[tokio::test]
async fn tickets_are_conserved_across_waves() {
    let fb = Fusebox::new();
    fb.configure_command(
        "wave",
        CommandConfig::new()
            .max_concurrent_requests(4)
            .timeout(Duration::from_secs(5)),
    );

    for _ in 0..3 {
        let mut handles = Vec::new();
        for _ in 0..8 {
            handles.push(fb.go(
                "wave",
                async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok::<_, BoxError>(())
                },
                None,
            ));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    let (breaker, _) = fb.get_circuit("wave");
    assert_eq!(breaker.pool().active_count(), 0);
}

#[tokio::test]
async fn timed_out_commands_release_their_tickets() {
    let fb = Fusebox::new();
    fb.configure_command(
        "leak",
        CommandConfig::new()
            .max_concurrent_requests(2)
            .timeout(Duration::from_millis(50)),
    );

    for _ in 0..6 {
        let _ = fb
            .execute(
                "leak",
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, BoxError>(())
                },
                None,
            )
            .await;
    }

    // Every timeout returned its ticket, so the pool never starved.
    let (breaker, _) = fb.get_circuit("leak");
    assert_eq!(breaker.pool().active_count(), 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        breaker
            .metrics()
            .default_collector()
            .timeouts()
            .sum(SystemTime::now()),
        6
    );
}

#[tokio::test]
async fn open_circuit_rejects_concurrent_callers_consistently() {
    let fb = Fusebox::new();
    fb.configure_command(
        "storm",
        CommandConfig::new()
            .request_volume_threshold(3)
            .error_percent_threshold(50)
            .sleep_window(Duration::from_secs(60)),
    );

    for _ in 0..5 {
        let _ = fb
            .execute("storm", async { Err::<(), BoxError>("down".into()) }, None)
            .await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let ran = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..50 {
        let fb = fb.clone();
        let ran = Arc::clone(&ran);
        handles.push(tokio::spawn(async move {
            fb.execute(
                "storm",
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Err::<(), BoxError>("down".into())
                },
                None,
            )
            .await
        }));
    }
    let mut short_circuited = 0;
    for handle in handles {
        if let Err(err) = handle.await.unwrap() {
            if err.is_circuit_open() {
                short_circuited += 1;
            }
        }
    }
    assert_eq!(short_circuited, 50, "no probe before the sleep window");
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn state_callback_sees_open_probe_close_cycle() {
    let fb = Fusebox::new();
    fb.configure_command(
        "cb",
        CommandConfig::new()
            .request_volume_threshold(3)
            .sleep_window(Duration::from_millis(150)),
    );

    let transitions = Arc::new(support::TransitionLog::default());
    let log = Arc::clone(&transitions);
    fb.register_callback("cb", move |name, state| {
        assert_eq!(name, "cb");
        log.push(state);
    });

    for _ in 0..4 {
        let _ = fb
            .execute("cb", async { Err::<(), BoxError>("down".into()) }, None)
            .await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (breaker, _) = fb.get_circuit("cb");
    assert!(breaker.is_open());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let result = fb.execute("cb", async { Ok::<_, BoxError>(()) }, None).await;
    assert!(result.is_ok());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = transitions.snapshot();
    assert!(seen.contains(&StateChange::Open), "saw {seen:?}");
    assert!(seen.contains(&StateChange::AllowSingle), "saw {seen:?}");
    assert!(seen.contains(&StateChange::Close), "saw {seen:?}");
}

/// Small helper so the callback (which must be `Fn`) can record state.
mod support {
    use fusebox::StateChange;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct TransitionLog(Mutex<Vec<StateChange>>);

    impl TransitionLog {
        pub fn push(&self, state: StateChange) {
            self.0.lock().unwrap().push(state);
        }

        pub fn snapshot(&self) -> Vec<StateChange> {
            self.0.lock().unwrap().clone()
        }
    }
}
