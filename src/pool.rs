use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::Settings;
use crate::context::Context;
use crate::error::CircuitError;
use crate::rolling;

/// Capacity of the pool-metrics update channel.
const METRICS_CHANNEL_CAPACITY: usize = 16;

/// One unit of execution capacity, checked out for exactly one run.
///
/// Tickets from a disabled command's pool are synthetic and carry no permit.
#[derive(Debug)]
pub struct Ticket {
    permit: Option<OwnedSemaphorePermit>,
}

/// Result of asking the pool for a ticket with a bounded wait.
pub enum AcquireOutcome {
    /// A primary ticket was obtained; `queued` is set when the caller had to
    /// wait in the queue first.
    Acquired { ticket: Ticket, queued: bool },
    /// Neither a ticket nor a waiting slot was available.
    Rejected,
    /// The deadline passed while waiting in the queue.
    TimedOut,
    /// The caller's context fired while waiting in the queue.
    Aborted(CircuitError),
}

/// Fixed-size ticket pool with an optional waiting queue.
///
/// The pool is sized from the command's settings when its circuit is
/// created. When the circuit breaker is disabled for the command, the pool
/// hands out an unlimited stream of synthetic tickets and only keeps the
/// accounting.
pub struct ExecutorPool {
    name: String,
    max: usize,
    tickets: Option<Arc<Semaphore>>,
    waiting: Option<Arc<Semaphore>>,
    queue_size: usize,
    synthetic_active: AtomicUsize,
    metrics: PoolMetrics,
}

impl ExecutorPool {
    /// Builds the pool for one command.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn new(name: &str, settings: &Settings) -> Self {
        let (tickets, waiting) = if settings.circuit_breaker_disabled {
            (None, None)
        } else {
            let waiting = (settings.queue_size_rejection_threshold > 0)
                .then(|| Arc::new(Semaphore::new(settings.queue_size_rejection_threshold)));
            (
                Some(Arc::new(Semaphore::new(settings.max_concurrent_requests))),
                waiting,
            )
        };

        Self {
            name: name.to_string(),
            max: settings.max_concurrent_requests,
            tickets,
            waiting,
            queue_size: settings.queue_size_rejection_threshold,
            synthetic_active: AtomicUsize::new(0),
            metrics: PoolMetrics::new(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool capacity; unlimited pools report `usize::MAX`.
    pub fn max(&self) -> usize {
        match self.tickets {
            Some(_) => self.max,
            None => usize::MAX,
        }
    }

    /// Tickets currently checked out, including callers parked in the queue.
    pub fn active_count(&self) -> usize {
        let Some(tickets) = &self.tickets else {
            return self.synthetic_active.load(Ordering::Relaxed);
        };
        let active = self.max - tickets.available_permits();
        let waiting = self
            .waiting
            .as_ref()
            .map(|w| self.queue_size - w.available_permits())
            .unwrap_or(0);
        active + waiting
    }

    /// Non-blocking fast path.
    pub fn try_acquire(&self) -> Option<Ticket> {
        let Some(tickets) = &self.tickets else {
            self.synthetic_active.fetch_add(1, Ordering::Relaxed);
            return Some(Ticket { permit: None });
        };
        Arc::clone(tickets)
            .try_acquire_owned()
            .ok()
            .map(|permit| Ticket {
                permit: Some(permit),
            })
    }

    /// Acquires a ticket, falling back to a waiting slot when the pool is
    /// exhausted. The wait is bounded by `deadline` and the caller's context.
    pub async fn acquire(&self, deadline: Instant, ctx: &Context) -> AcquireOutcome {
        if let Some(ticket) = self.try_acquire() {
            return AcquireOutcome::Acquired {
                ticket,
                queued: false,
            };
        }

        let Some(waiting) = &self.waiting else {
            return AcquireOutcome::Rejected;
        };
        let Ok(slot) = Arc::clone(waiting).try_acquire_owned() else {
            return AcquireOutcome::Rejected;
        };

        // The slot is held for the duration of the wait and released on
        // every exit path below.
        let tickets = match &self.tickets {
            Some(tickets) => Arc::clone(tickets),
            None => return AcquireOutcome::Rejected,
        };

        let outcome = tokio::select! {
            permit = tickets.acquire_owned() => match permit {
                Ok(permit) => AcquireOutcome::Acquired {
                    ticket: Ticket {
                        permit: Some(permit),
                    },
                    queued: true,
                },
                Err(_) => AcquireOutcome::Rejected,
            },
            _ = tokio::time::sleep_until(deadline) => AcquireOutcome::TimedOut,
            cause = ctx.done() => AcquireOutcome::Aborted(cause),
        };
        drop(slot);
        outcome
    }

    /// Returns a ticket to the pool. A `None` ticket is a no-op, so callers
    /// that never completed acquisition can finalize unconditionally.
    pub fn return_ticket(&self, ticket: Option<Ticket>) {
        let Some(ticket) = ticket else {
            return;
        };
        self.metrics.update(self.active_count());
        if ticket.permit.is_none() {
            self.synthetic_active.fetch_sub(1, Ordering::Relaxed);
        }
        drop(ticket);
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

struct PoolUpdate {
    active_count: usize,
}

/// Rolling accounting for one pool: commands executed and the peak number
/// of concurrently active requests, fed by a monitor task.
pub struct PoolMetrics {
    updates: mpsc::Sender<PoolUpdate>,
    executed: Arc<rolling::Number>,
    max_active_requests: Arc<rolling::Number>,
}

impl PoolMetrics {
    fn new(name: &str) -> Self {
        let (updates, mut rx) = mpsc::channel::<PoolUpdate>(METRICS_CHANNEL_CAPACITY);
        let executed = Arc::new(rolling::Number::new());
        let max_active_requests = Arc::new(rolling::Number::new());

        let executed_task = Arc::clone(&executed);
        let max_active_task = Arc::clone(&max_active_requests);
        let name = name.to_string();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                executed_task.increment(1);
                max_active_task.update_max(update.active_count as u64);
            }
            tracing::debug!(pool = %name, "pool metrics monitor stopped");
        });

        Self {
            updates,
            executed,
            max_active_requests,
        }
    }

    fn update(&self, active_count: usize) {
        let _ = self.updates.try_send(PoolUpdate { active_count });
    }

    pub fn executed(&self) -> &rolling::Number {
        &self.executed
    }

    pub fn max_active_requests(&self) -> &rolling::Number {
        &self.max_active_requests
    }

    pub fn reset(&self) {
        self.executed.reset();
        self.max_active_requests.reset();
    }
}
