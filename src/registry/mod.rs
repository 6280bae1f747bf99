//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! Deployment tooling / config
//!     → directory.rs (register / deregister)
//!     → per-service ordered member list of instance.rs records
//!
//! HealthChecker
//!     → directory.rs (update_health, sole writer of status)
//!
//! LoadBalancer
//!     → directory.rs (list: snapshot copy of membership)
//! ```
//!
//! # Design Decisions
//! - Pure in-memory directory, no network I/O
//! - Membership changes are never fatal (unknown deregister is a no-op)
//! - Snapshots keep in-flight selections consistent under mutation

pub mod instance;
pub mod directory;

pub use instance::{ConnectionGuard, HealthStatus, InstanceSnapshot, ServiceInstance};
pub use directory::ServiceRegistry;
