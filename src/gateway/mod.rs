//! API gateway.
//!
//! # Data Flow
//! ```text
//! InboundRequest (method, uri, headers, body, client ip)
//!     → router.rs: route lookup (priority ordered)
//!     → auth.rs: bearer token unless the path is public
//!     → rate_limit.rs: token bucket per principal or client ip
//!     → trace context from X-Trace-ID (or a new root)
//!     → ServiceClient::call_with (affinity key = client ip)
//!     → Response + X-Trace-ID, `gateway.request` event in the background
//! ```
//!
//! # Design Decisions
//! - Route table swapped atomically; in-flight requests keep the old one
//! - Upstream 4xx answers pass through untouched
//! - Failures carry a JSON body with the trace id for support lookups

pub mod auth;
pub mod error;
pub mod matcher;
pub mod rate_limit;
pub mod request;
pub mod router;

pub use auth::{AuthError, Authenticator, Principal, PublicPaths, StaticTokenAuthenticator};
pub use error::GatewayError;
pub use rate_limit::RateLimiter;
pub use request::InboundRequest;
pub use router::{GatewayRequestRecord, GatewayRouter, RouteStats, GATEWAY_REQUEST_EVENT};
