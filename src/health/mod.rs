//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (checker.rs)
//!     → probe every registered instance concurrently (probe.rs)
//!     → record outcome (history.rs), update consecutive counters
//!     → state.rs decides transitions
//!     → instance status updated in place (registry sees it immediately)
//!     → HealthEvent broadcast + observers
//! ```
//!
//! # Design Decisions
//! - One shared scheduler for all instances
//! - State transitions require consecutive successes/failures
//! - Probes never raise; every error is an unhealthy outcome
//! - Health state is per-instance

pub mod checker;
pub mod history;
pub mod probe;
pub mod state;

pub use checker::{HealthChecker, HealthEvent, HealthObserver, OverallHealth};
pub use history::{HealthRecord, HealthStats};
pub use probe::{FnProbe, HttpProbe, Probe, ProbeOutcome, TcpProbe};
