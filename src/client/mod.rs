//! Outbound service calls.
//!
//! # Data Flow
//! ```text
//! caller → ServiceClient::call(service, request, token, timeout)
//!     → LoadBalancer selects one instance
//!     → CircuitBreaker::try_acquire() for service/instance (else CircuitOpen, no I/O)
//!     → attempt: Authorization + X-Trace-ID + X-Span-ID, per-attempt timeout
//!     → transient failure: backoff with jitter, retry on the same instance
//!     → the permit is settled once with success / failure (dropped: released)
//! ```
//!
//! # Design Decisions
//! - Transport is a trait so tests can script upstream behavior
//! - Responses are buffered; bodies are small RPC payloads
//! - 4xx answers are surfaced immediately but still count as breaker failures

pub mod error;
pub mod service;
pub mod transport;

pub use error::CallError;
pub use service::{CallOptions, ServiceClient};
pub use transport::{HttpTransport, OutboundRequest, OutboundResponse, Transport, TransportError};
