//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MeshConfig (validated, immutable)
//!     → MeshContext builds every subsystem from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → gateway swaps its route table atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only routes are hot-reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{
    AdminConfig, AuthConfig, CircuitBreakerConfig, EventsConfig, HealthCheckConfig,
    InstanceConfig, ListenerConfig, LoadBalancerConfig, MeshConfig, ObservabilityConfig,
    ProbeKind, RateLimitConfig, RetryConfig, RouteConfig, ServiceConfig, TimeoutConfig,
};
