//! Error types for the bus crate.

use mibo_core::EventId;
use std::fmt;
use std::time::Duration;

/// Errors surfaced to callers of [`EventBus::wait`](crate::EventBus::wait).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No correlated response arrived before the deadline.
    WaitTimeout {
        /// Kind of the response that was expected.
        kind: &'static str,
        /// Correlation identifier of the request.
        correlation_id: EventId,
        /// The deadline that elapsed.
        timeout: Duration,
    },
    /// The bus shut down before a response arrived.
    Closed,
}

impl BusError {
    /// Returns true if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitTimeout {
                kind,
                correlation_id,
                timeout,
            } => write!(
                f,
                "timed out after {timeout:?} waiting for {kind} correlated to {correlation_id}"
            ),
            Self::Closed => write!(f, "event bus is closed"),
        }
    }
}

impl std::error::Error for BusError {}
