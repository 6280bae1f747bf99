//! Outbound call errors.

use thiserror::Error;

use crate::client::transport::OutboundResponse;
use crate::load_balancer::NoHealthyInstance;

/// Failure of a `ServiceClient` call.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("no healthy instance for service {0}")]
    NoHealthyInstance(String),

    /// The target's breaker rejected the call; no I/O was attempted.
    #[error("circuit open for {service} ({instance})")]
    CircuitOpen { service: String, instance: String },

    #[error("call to {service} timed out after {attempts} attempt(s)")]
    Timeout { service: String, attempts: u32 },

    /// Transient failures exhausted the retry budget.
    #[error("{service} unavailable after {attempts} attempt(s): {reason}")]
    Unavailable {
        service: String,
        attempts: u32,
        reason: String,
    },

    /// Upstream answered with a 4xx.
    #[error("upstream rejected request with status {}", .0.status)]
    Client(Box<OutboundResponse>),

    /// The request could not be built or serialized.
    #[error("invalid request: {0}")]
    Request(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl CallError {
    /// Transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Timeout { .. } | CallError::Unavailable { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }
}

impl From<NoHealthyInstance> for CallError {
    fn from(err: NoHealthyInstance) -> Self {
        CallError::NoHealthyInstance(err.0)
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::Request(err.to_string())
    }
}
