//! The process-wide default instance. Serialized because every test here
//! shares it.

use std::time::{Duration, SystemTime};

use fusebox::{BoxError, CommandConfig, Fallback};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn free_functions_drive_the_default_instance() {
    fusebox::flush();
    fusebox::configure_command(
        "global_s",
        CommandConfig::new().timeout(Duration::from_millis(500)),
    );

    let result = fusebox::execute("global_s", async { Ok::<_, BoxError>(7) }, None).await;
    assert_eq!(result.unwrap(), 7);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (breaker, created) = fusebox::get_circuit("global_s");
    assert!(!created);
    assert_eq!(
        breaker
            .metrics()
            .default_collector()
            .successes()
            .sum(SystemTime::now()),
        1
    );

    let settings = fusebox::circuit_settings();
    assert_eq!(settings["global_s"].timeout, Duration::from_millis(500));
}

#[tokio::test]
#[serial]
async fn flush_resets_the_default_instance() {
    fusebox::flush();
    let _ = fusebox::execute("global_f", async { Ok::<_, BoxError>(()) }, None).await;
    let (_, created) = fusebox::get_circuit("global_f");
    assert!(!created);

    fusebox::flush();
    let (_, created) = fusebox::get_circuit("global_f");
    assert!(created);
    fusebox::flush();
}

#[tokio::test]
#[serial]
async fn global_force_open_short_circuits() {
    fusebox::flush();
    fusebox::toggle_force_open("global_o", true);

    let err = fusebox::execute(
        "global_o",
        async { Ok::<_, BoxError>(()) },
        Some(Fallback::new(|err| async move {
            Err::<(), BoxError>(err.to_string().into())
        })),
    )
    .await
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "fallback failed with 'hystrix: circuit open'. run error was 'hystrix: circuit open'"
    );

    fusebox::toggle_force_open("global_o", false);
    fusebox::flush();
}

#[tokio::test]
#[serial]
async fn go_returns_before_the_run_finishes() {
    fusebox::flush();
    let started = std::time::Instant::now();
    let handle = fusebox::go(
        "global_bg",
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, BoxError>(())
        },
        None,
    );
    assert!(started.elapsed() < Duration::from_millis(100), "go must not block");
    assert!(handle.await.is_ok());
    fusebox::flush();
}
