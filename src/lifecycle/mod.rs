//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     MeshConfig → registry → balancer + breakers → client
//!         → health checker → event log + bus → gateway
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → background tasks exit → drain with grace
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//!     SIGHUP → route reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, stop background tasks, drain event queues
//! - Shutdown has a grace period: stuck tasks are aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{next_signal, Signal};
pub use startup::{MeshContext, StartupError, HEALTH_CHANGED_EVENT, INSTANCE_EVICTED_EVENT};
