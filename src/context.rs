use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::error::CircuitError;

/// Caller-side abort signal for a command, with an optional deadline.
///
/// Clones observe the same signal, so the same context can be handed to the
/// command engine and captured by the run future for cooperative
/// cancellation; the engine never interrupts a run forcibly.
///
/// ```
/// use fusebox::Context;
/// use std::time::Duration;
///
/// let ctx = Context::with_timeout(Duration::from_secs(2));
/// let for_run = ctx.clone();
/// // ... pass `ctx` to `go_with_context`, move `for_run` into the run future
/// ctx.cancel();
/// assert!(for_run.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    cancel: watch::Sender<bool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never fires on its own; only `cancel` ends it.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A context that fires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    /// A context that fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner { cancel, deadline }),
        }
    }

    /// Signals every clone of this context to stop. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Resolves when the context fires, reporting why.
    ///
    /// Pends forever on a plain context that is never cancelled.
    pub async fn done(&self) -> CircuitError {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancelled() => CircuitError::ContextCanceled,
                    _ = tokio::time::sleep_until(deadline) => CircuitError::ContextDeadlineExceeded,
                }
            }
            None => {
                self.cancelled().await;
                CircuitError::ContextCanceled
            }
        }
    }

    async fn cancelled(&self) {
        let mut rx = self.inner.cancel.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // The sender lives inside `self`; it cannot drop first.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
