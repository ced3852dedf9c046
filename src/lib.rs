//! Latency and fault tolerance for calls to unreliable dependencies.
//!
//! `fusebox` wraps calls to remote systems and third-party libraries in
//! named *commands*. Each command runs under a timeout, holds one ticket
//! from a bounded concurrency pool, and is admitted through a circuit
//! breaker: once recent executions fail often enough, further calls are
//! short-circuited until a probe shows the dependency has recovered. The
//! wire formats (error strings, dashboard event stream) are compatible with
//! the other Hystrix ports.
//!
//! ## States
//! - **Closed**: normal operation, calls are admitted
//! - **Open**: the error rate crossed the threshold, calls short-circuit
//! - **Half-open**: after the sleep window, a single probe is admitted;
//!   its success closes the circuit
//!
//! ## Basic example
//!
//! ```rust
//! use fusebox::{BoxError, CommandConfig, Fallback, Fusebox};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let fb = Fusebox::new();
//! fb.configure_command(
//!     "get_user",
//!     CommandConfig::new()
//!         .timeout(Duration::from_millis(500))
//!         .max_concurrent_requests(50)
//!         .error_percent_threshold(25),
//! );
//!
//! let user = fb
//!     .execute(
//!         "get_user",
//!         async {
//!             // talk to the unreliable dependency here
//!             Ok::<_, BoxError>("alice")
//!         },
//!         Some(Fallback::new(|_err| async { Ok("anonymous") })),
//!     )
//!     .await;
//! assert!(user.is_ok());
//! # }
//! ```
//!
//! ## Fire and forget
//!
//! [`Fusebox::go`] returns a [`CommandHandle`] immediately; awaiting it
//! yields the terminal result. [`Fusebox::execute`] is `go` awaited.
//!
//! ```rust
//! use fusebox::{BoxError, Fusebox};
//!
//! # async fn example() {
//! let fb = Fusebox::new();
//! let handle = fb.go("warm_cache", async { Ok::<_, BoxError>(()) }, None);
//! // ... other work ...
//! let _ = handle.await;
//! # }
//! ```
//!
//! ## Cancellation
//!
//! A [`Context`] carries a caller-side abort signal and optional deadline.
//! Cancelling finalizes the command promptly (`context canceled` /
//! `context deadline exceeded` in metrics); the run future is never
//! interrupted forcibly and should observe a context clone cooperatively.
//!
//! ```rust
//! use fusebox::{BoxError, Context, Fusebox};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let fb = Fusebox::new();
//! let ctx = Context::with_timeout(Duration::from_secs(1));
//! let handle = fb.go_with_context(ctx.clone(), "sync", async {
//!     Ok::<_, BoxError>(())
//! }, None);
//! ctx.cancel();
//! let _ = handle.await;
//! # }
//! ```
//!
//! ## Dashboard stream
//!
//! [`EventStream`] publishes one Server-Sent-Events frame per circuit per
//! second in the Hystrix dashboard format; serving it over HTTP is left to
//! the embedding application.
//!
//! ## Features
//! - `metrics`: adds [`FacadeCollector`](collector::FacadeCollector), a
//!   collector that forwards command events to the `metrics` crate facade.

pub mod callback;
pub mod circuit;
pub mod collector;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod eventstream;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod rolling;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

pub use crate::circuit::CircuitBreaker;
pub use crate::collector::{CollectorRegistry, DefaultCollector, MetricCollector};
pub use crate::command::{CommandHandle, Fallback};
pub use crate::config::{CommandConfig, Settings};
pub use crate::context::Context;
pub use crate::error::{BoxError, CircuitError, CommandError};
pub use crate::events::{CommandExecution, EventKind, StateChange};
pub use crate::eventstream::EventStream;
pub use crate::metrics::MetricExchange;
pub use crate::pool::{AcquireOutcome, ExecutorPool, Ticket};
pub use crate::registry::Fusebox;

static GLOBAL: OnceLock<Fusebox> = OnceLock::new();

/// The process-wide default instance behind the free functions below.
///
/// Libraries should prefer owning a [`Fusebox`] and threading it through;
/// the global exists for applications that want the original package-level
/// ergonomics.
pub fn global() -> &'static Fusebox {
    GLOBAL.get_or_init(Fusebox::new)
}

/// [`Fusebox::go`] on the default instance.
pub fn go<T, R>(name: &str, run: R, fallback: Option<Fallback<T>>) -> CommandHandle<T>
where
    T: Send + 'static,
    R: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    global().go(name, run, fallback)
}

/// [`Fusebox::go_with_context`] on the default instance.
pub fn go_with_context<T, R>(
    ctx: Context,
    name: &str,
    run: R,
    fallback: Option<Fallback<T>>,
) -> CommandHandle<T>
where
    T: Send + 'static,
    R: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    global().go_with_context(ctx, name, run, fallback)
}

/// [`Fusebox::execute`] on the default instance.
pub async fn execute<T, R>(
    name: &str,
    run: R,
    fallback: Option<Fallback<T>>,
) -> Result<T, CommandError>
where
    T: Send + 'static,
    R: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    global().execute(name, run, fallback).await
}

/// [`Fusebox::execute_with_context`] on the default instance.
pub async fn execute_with_context<T, R>(
    ctx: Context,
    name: &str,
    run: R,
    fallback: Option<Fallback<T>>,
) -> Result<T, CommandError>
where
    T: Send + 'static,
    R: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    global().execute_with_context(ctx, name, run, fallback).await
}

/// [`Fusebox::configure`] on the default instance.
pub fn configure<I>(commands: I)
where
    I: IntoIterator<Item = (String, CommandConfig)>,
{
    global().configure(commands)
}

/// [`Fusebox::configure_command`] on the default instance.
pub fn configure_command(name: &str, config: CommandConfig) {
    global().configure_command(name, config)
}

/// [`Fusebox::get_circuit`] on the default instance.
pub fn get_circuit(name: &str) -> (Arc<CircuitBreaker>, bool) {
    global().get_circuit(name)
}

/// [`Fusebox::toggle_force_open`] on the default instance.
pub fn toggle_force_open(name: &str, toggle: bool) {
    global().toggle_force_open(name, toggle)
}

/// [`Fusebox::flush`] on the default instance.
pub fn flush() {
    global().flush()
}

/// [`Fusebox::circuit_settings`] on the default instance.
pub fn circuit_settings() -> HashMap<String, Arc<Settings>> {
    global().circuit_settings()
}
