use thiserror::Error;

/// Boxed error type accepted from user run and fallback functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the library itself, all recoverable through a fallback.
///
/// The display strings are part of the wire contract shared with other
/// Hystrix ports and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CircuitError {
    /// The circuit is open; the call was rejected without running.
    #[error("hystrix: circuit open")]
    CircuitOpen,

    /// No execution ticket was available; the call was rejected.
    #[error("hystrix: max concurrency")]
    MaxConcurrency,

    /// The run did not complete within the configured timeout.
    #[error("hystrix: timeout")]
    Timeout,

    /// The caller's context was cancelled before the run completed.
    #[error("context canceled")]
    ContextCanceled,

    /// The caller's context deadline passed before the run completed.
    #[error("context deadline exceeded")]
    ContextDeadlineExceeded,
}

/// Terminal error of one command invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A circuit error, raised before or instead of the run completing.
    #[error(transparent)]
    Circuit(#[from] CircuitError),

    /// The error returned by the user's run function, unwrapped.
    #[error("{0}")]
    Run(BoxError),

    /// The fallback was invoked and also failed.
    #[error("fallback failed with '{fallback}'. run error was '{run}'")]
    Fallback {
        /// The error returned by the fallback function.
        fallback: BoxError,
        /// Display form of the error that triggered the fallback.
        run: String,
    },

    /// The command task terminated without producing a result. Only seen
    /// when the runtime shuts down mid-flight.
    #[error("command interrupted before completion")]
    Interrupted,
}

impl CommandError {
    /// True when the call was rejected because the circuit is open.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CommandError::Circuit(CircuitError::CircuitOpen))
    }

    /// True when the call was rejected for lack of concurrency tickets.
    pub fn is_max_concurrency(&self) -> bool {
        matches!(self, CommandError::Circuit(CircuitError::MaxConcurrency))
    }

    /// True when the run exceeded the command timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Circuit(CircuitError::Timeout))
    }

    /// True when the caller's context ended the command.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            CommandError::Circuit(CircuitError::ContextCanceled)
                | CommandError::Circuit(CircuitError::ContextDeadlineExceeded)
        )
    }

    /// Returns the run error if this invocation failed in the user's code.
    pub fn run_error(&self) -> Option<&BoxError> {
        match self {
            CommandError::Run(e) => Some(e),
            _ => None,
        }
    }
}
