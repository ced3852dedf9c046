use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::debug;

use crate::circuit::CircuitBreaker;
use crate::config::Settings;
use crate::context::Context;
use crate::error::{BoxError, CircuitError, CommandError};
use crate::events::EventKind;
use crate::pool::{AcquireOutcome, Ticket};
use crate::registry::Fusebox;

/// Completion handle returned by [`Fusebox::go`]: resolves exactly once with
/// the invocation's terminal result.
pub struct CommandHandle<T> {
    rx: oneshot::Receiver<Result<T, CommandError>>,
}

impl<T> Future for CommandHandle<T> {
    type Output = Result<T, CommandError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(CommandError::Interrupted),
        })
    }
}

/// Recovery function invoked when the run path fails or is denied.
///
/// The fallback receives the triggering error and produces a degraded
/// result. It runs at most once per invocation.
pub struct Fallback<T> {
    f: Box<dyn FnOnce(CommandError) -> BoxFuture<'static, Result<T, BoxError>> + Send>,
}

impl<T> Fallback<T> {
    /// ```
    /// use fusebox::{CommandError, Fallback};
    ///
    /// let fallback = Fallback::new(|err: CommandError| async move {
    ///     if err.is_timeout() {
    ///         Ok("cached value")
    ///     } else {
    ///         Err(err.to_string().into())
    ///     }
    /// });
    /// # let _ = fallback;
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CommandError) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |err| f(err).boxed()),
        }
    }
}

impl Fusebox {
    /// Starts `run` as the named command and returns immediately.
    ///
    /// The run is admitted through the command's circuit, holds one
    /// concurrency ticket for its duration, and races the configured
    /// timeout. Must be called within a Tokio runtime.
    pub fn go<T, R>(&self, name: &str, run: R, fallback: Option<Fallback<T>>) -> CommandHandle<T>
    where
        T: Send + 'static,
        R: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.go_with_context(Context::new(), name, run, fallback)
    }

    /// [`go`](Fusebox::go) with a caller-supplied abort signal.
    ///
    /// When `ctx` fires before the run completes, the command finalizes
    /// with a cancellation error; the run future itself is left to finish
    /// in the background and observe `ctx` cooperatively.
    pub fn go_with_context<T, R>(
        &self,
        ctx: Context,
        name: &str,
        run: R,
        fallback: Option<Fallback<T>>,
    ) -> CommandHandle<T>
    where
        T: Send + 'static,
        R: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let (circuit, _) = self.get_circuit(name);
        let settings = self.settings_for(name);
        tokio::spawn(execute_command(ctx, circuit, settings, run, fallback, tx));
        CommandHandle { rx }
    }

    /// Runs the named command synchronously, blocking the caller until the
    /// terminal result.
    pub async fn execute<T, R>(
        &self,
        name: &str,
        run: R,
        fallback: Option<Fallback<T>>,
    ) -> Result<T, CommandError>
    where
        T: Send + 'static,
        R: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.go(name, run, fallback).await
    }

    /// [`execute`](Fusebox::execute) with a caller-supplied abort signal.
    pub async fn execute_with_context<T, R>(
        &self,
        ctx: Context,
        name: &str,
        run: R,
        fallback: Option<Fallback<T>>,
    ) -> Result<T, CommandError>
    where
        T: Send + 'static,
        R: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.go_with_context(ctx, name, run, fallback).await
    }
}

/// One invocation, driven to exactly one terminal state.
///
/// This task is the sole finalizer: it owns the ticket, the event record,
/// the fallback and the result channel, so the at-most-once guarantees hold
/// structurally. The run future executes as a separate task whose result is
/// observed through its join handle; when the timeout or the caller's
/// context wins the race instead, the run keeps going in the background but
/// can no longer report anything.
async fn execute_command<T, R>(
    ctx: Context,
    circuit: Arc<CircuitBreaker>,
    settings: Arc<Settings>,
    run: R,
    fallback: Option<Fallback<T>>,
    tx: oneshot::Sender<Result<T, CommandError>>,
) where
    T: Send + 'static,
    R: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + settings.timeout;

    let mut finalizer = Finalizer {
        circuit,
        start,
        run_duration: Duration::ZERO,
        ticket: None,
        queued: false,
        fallback,
        tx,
    };

    if !settings.circuit_breaker_disabled && !finalizer.circuit.allow_request() {
        finalizer.reject(CircuitError::CircuitOpen).await;
        return;
    }

    match finalizer.circuit.pool().acquire(deadline, &ctx).await {
        AcquireOutcome::Acquired { ticket, queued } => {
            finalizer.ticket = Some(ticket);
            finalizer.queued = queued;
        }
        AcquireOutcome::Rejected => {
            finalizer.reject(CircuitError::MaxConcurrency).await;
            return;
        }
        AcquireOutcome::TimedOut => {
            finalizer.reject(CircuitError::Timeout).await;
            return;
        }
        AcquireOutcome::Aborted(cause) => {
            finalizer.reject(cause).await;
            return;
        }
    }

    let run_task = tokio::spawn(run);
    tokio::select! {
        joined = run_task => {
            finalizer.run_duration = start.elapsed();
            match joined {
                Ok(Ok(value)) => finalizer.succeed(value),
                Ok(Err(err)) => finalizer.fail(CommandError::Run(err), EventKind::Failure).await,
                // The run task panicked; surface it as a run failure.
                Err(join_err) => {
                    finalizer
                        .fail(CommandError::Run(Box::new(join_err)), EventKind::Failure)
                        .await
                }
            }
        }
        _ = tokio::time::sleep_until(deadline) => {
            finalizer.reject(CircuitError::Timeout).await;
        }
        cause = ctx.done() => {
            finalizer.reject(cause).await;
        }
    }
}

fn event_for(err: CircuitError) -> EventKind {
    match err {
        CircuitError::CircuitOpen => EventKind::ShortCircuit,
        CircuitError::MaxConcurrency => EventKind::Rejected,
        CircuitError::Timeout => EventKind::Timeout,
        CircuitError::ContextCanceled => EventKind::ContextCanceled,
        CircuitError::ContextDeadlineExceeded => EventKind::ContextDeadlineExceeded,
    }
}

struct Finalizer<T> {
    circuit: Arc<CircuitBreaker>,
    start: Instant,
    run_duration: Duration,
    ticket: Option<Ticket>,
    queued: bool,
    fallback: Option<Fallback<T>>,
    tx: oneshot::Sender<Result<T, CommandError>>,
}

impl<T> Finalizer<T> {
    async fn reject(self, cause: CircuitError) {
        let kind = event_for(cause);
        self.fail(cause.into(), kind).await;
    }

    fn succeed(mut self, value: T) {
        self.circuit.pool().return_ticket(self.ticket.take());
        let mut types = vec![EventKind::Success];
        if self.queued {
            types.push(EventKind::Queued);
        }
        self.circuit
            .report_event(types, self.start, self.run_duration);
        let _ = self.tx.send(Ok(value));
    }

    async fn fail(mut self, error: CommandError, kind: EventKind) {
        debug!(circuit = %self.circuit.name(), event = %kind, "command did not succeed");
        // The ticket goes back before the fallback runs; recovery work must
        // not hold execution capacity.
        self.circuit.pool().return_ticket(self.ticket.take());

        let mut types = vec![kind];
        let result = match self.fallback.take() {
            None => Err(error),
            Some(fallback) => {
                let run_msg = error.to_string();
                match AssertUnwindSafe((fallback.f)(error)).catch_unwind().await {
                    Ok(Ok(value)) => {
                        types.push(EventKind::FallbackSuccess);
                        Ok(value)
                    }
                    Ok(Err(fallback_err)) => {
                        types.push(EventKind::FallbackFailure);
                        Err(CommandError::Fallback {
                            fallback: fallback_err,
                            run: run_msg,
                        })
                    }
                    Err(_) => {
                        types.push(EventKind::FallbackFailure);
                        Err(CommandError::Fallback {
                            fallback: BoxError::from("fallback panicked"),
                            run: run_msg,
                        })
                    }
                }
            }
        };
        if self.queued {
            types.push(EventKind::Queued);
        }
        self.circuit
            .report_event(types, self.start, self.run_duration);
        let _ = self.tx.send(result);
    }
}
