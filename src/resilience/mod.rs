//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an instance:
//!     → circuit_breaker.rs (fail fast while the target is open)
//!     → timeouts.rs (per-attempt timeout, overall deadline)
//!     → On transient failure: retries.rs + backoff.rs (retry with jitter)
//!     → circuit_breaker.rs (one outcome reported per call)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries only for transient failures
//! - Circuit breaker prevents cascading failures
//! - Event delivery retries reuse the same backoff

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerPermit, BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitBreakers, CircuitState,
};
pub use retries::RetryPolicy;
pub use timeouts::Deadline;
