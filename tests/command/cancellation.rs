use std::time::{Duration, SystemTime};

use fusebox::{BoxError, CircuitError, CommandConfig, CommandError, Context, Fusebox};

#[tokio::test]
async fn caller_cancel_finalizes_promptly() {
    let fb = Fusebox::new();
    fb.configure_command("cc", CommandConfig::new().timeout(Duration::from_secs(10)));

    let ctx = Context::new();
    let handle = fb.go_with_context(
        ctx.clone(),
        "cc",
        async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, BoxError>(())
        },
        None,
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel();

    let start = std::time::Instant::now();
    let err = handle.await.unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5), "finalization was not prompt");
    assert!(matches!(
        err,
        CommandError::Circuit(CircuitError::ContextCanceled)
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (breaker, _) = fb.get_circuit("cc");
    let now = SystemTime::now();
    assert_eq!(
        breaker
            .metrics()
            .default_collector()
            .context_canceled()
            .sum(now),
        1
    );
    // The ticket came back even though the run is still sleeping.
    assert_eq!(breaker.pool().active_count(), 0);
}

#[tokio::test]
async fn caller_deadline_is_distinguished_from_command_timeout() {
    let fb = Fusebox::new();
    fb.configure_command("cd", CommandConfig::new().timeout(Duration::from_secs(10)));

    let ctx = Context::with_timeout(Duration::from_millis(50));
    let err = fb
        .execute_with_context(
            ctx,
            "cd",
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, BoxError>(())
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Circuit(CircuitError::ContextDeadlineExceeded)
    ));
    assert_eq!(err.to_string(), "context deadline exceeded");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (breaker, _) = fb.get_circuit("cd");
    let now = SystemTime::now();
    let collector = breaker.metrics().default_collector();
    assert_eq!(collector.context_deadline_exceeded().sum(now), 1);
    // Cancellations count as attempts but not as errors.
    assert_eq!(collector.requests().sum(now), 1);
    assert_eq!(collector.errors().sum(now), 0);
}

#[tokio::test]
async fn cancel_before_start_still_finalizes_once() {
    let fb = Fusebox::new();
    let ctx = Context::new();
    ctx.cancel();

    let err = fb
        .execute_with_context(ctx, "pre", async { Ok::<_, BoxError>(()) }, None)
        .await;
    // The run may win the race if it is immediate; either way there is
    // exactly one terminal result and no hang.
    match err {
        Ok(()) => {}
        Err(e) => assert!(e.is_canceled(), "unexpected error: {e}"),
    }
}

#[tokio::test]
async fn command_timeout_still_applies_with_context() {
    let fb = Fusebox::new();
    fb.configure_command("ct", CommandConfig::new().timeout(Duration::from_millis(50)));

    // Context has a far deadline; the command's own timeout fires first.
    let ctx = Context::with_timeout(Duration::from_secs(60));
    let err = fb
        .execute_with_context(
            ctx,
            "ct",
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, BoxError>(())
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}
