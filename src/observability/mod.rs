//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (correlation / causation ids on calls and events)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Correlation id flows through calls and events alike
//! - Metrics are cheap (no-ops until a recorder is installed)

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::tracing::{TraceContext, SPAN_ID_HEADER, TRACE_ID_HEADER};
