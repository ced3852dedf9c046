use std::fmt;
use std::time::{Duration, Instant};

/// Everything a single command invocation can report about itself.
///
/// Exactly one terminal kind (`Success` through `ContextDeadlineExceeded`)
/// leads the record, optionally followed by a fallback outcome and `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Success,
    Failure,
    Rejected,
    ShortCircuit,
    Timeout,
    ContextCanceled,
    ContextDeadlineExceeded,
    FallbackSuccess,
    FallbackFailure,
    Queued,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Success => "success",
            EventKind::Failure => "failure",
            EventKind::Rejected => "rejected",
            EventKind::ShortCircuit => "short-circuit",
            EventKind::Timeout => "timeout",
            EventKind::ContextCanceled => "context-canceled",
            EventKind::ContextDeadlineExceeded => "context-deadline-exceeded",
            EventKind::FallbackSuccess => "fallback-success",
            EventKind::FallbackFailure => "fallback-failure",
            EventKind::Queued => "queued",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record a finished invocation sends to the metric exchange,
/// emitted exactly once per invocation.
#[derive(Debug, Clone)]
pub struct CommandExecution {
    /// Terminal kind first; the first kind drives circuit recovery.
    pub types: Vec<EventKind>,
    /// When the invocation started; total duration is measured from here.
    pub start: Instant,
    /// How long the run itself took. Zero when the run never completed.
    pub run_duration: Duration,
}

/// Circuit transitions delivered to a registered state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// The circuit tripped open.
    Open,
    /// The circuit recovered and closed.
    Close,
    /// A single probe was admitted while open.
    AllowSingle,
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateChange::Open => "Open",
            StateChange::Close => "Close",
            StateChange::AllowSingle => "Allow Single",
        })
    }
}
