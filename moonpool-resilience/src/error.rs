use std::fmt;

use thiserror::Error;

use crate::clock::Tick;

/// Errors raised by the simulation engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// The clock or its executor has been shut down and is no longer accessible.
    #[error("Simulation has been shut down")]
    SimulationShutdown,
    /// Another run already owns the clock.
    #[error("another simulation is already running")]
    AlreadyRunning,
    /// A driven future is still parked but nothing is left to wake it.
    #[error("simulation stalled at tick {tick} with {parked} parked future(s)")]
    Stalled {
        /// Tick at which the clock ran out of scheduled work.
        tick: Tick,
        /// Number of sleeps still waiting for a timer.
        parked: usize,
    },
    /// The clock was stopped before the driven future completed.
    #[error("clock stopped at tick {tick} before the driven future completed")]
    Stopped {
        /// Tick at which the clock was stopped.
        tick: Tick,
    },
    /// The simulation is in an invalid state.
    #[error("Invalid simulation state: {0}")]
    InvalidState(String),
}

/// A type alias for `Result<T, SimulationError>`.
pub type SimulationResult<T> = Result<T, SimulationError>;

/// Why a stage turned an event away before any work was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No free worker and no room left in the wait-list.
    QueueFull,
    /// The circuit breaker is open.
    BreakerOpen,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => f.write_str("fail"),
            RejectReason::BreakerOpen => f.write_str("breaker open"),
        }
    }
}

/// Terminal failure of an event inside a stage.
///
/// The `Display` output is the payload string reported on the event's
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// Admission control refused the event. Domain logic never ran.
    #[error("{0}")]
    Rejected(RejectReason),
    /// The timer won the race against the wrapped stage.
    #[error("timeout")]
    Timeout,
    /// Every retry attempt failed.
    #[error("fail")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// Nothing cached yet for the requested key.
    #[error("fail")]
    CacheMiss,
    /// Domain-level failure carrying its own payload.
    #[error("{0}")]
    Payload(String),
    /// A failure that did not originate from domain logic, stringified.
    #[error("{0}")]
    Unexpected(String),
}

impl Failure {
    /// Shorthand for a domain failure with the given payload.
    pub fn payload(payload: impl Into<String>) -> Self {
        Failure::Payload(payload.into())
    }

    /// The payload string carried to the caller.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Returns `true` for admission rejections, which never reach domain logic.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Failure::Rejected(_))
    }
}

impl From<SimulationError> for Failure {
    fn from(err: SimulationError) -> Self {
        Failure::Unexpected(err.to_string())
    }
}
