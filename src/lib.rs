//! Resilient service mesh library.
//!
//! A service registry with active health checks, pluggable load balancing,
//! per-instance circuit breakers, a retrying service client, a durable event
//! bus and an API gateway that ties them together.

pub mod admin;
pub mod client;
pub mod config;
pub mod events;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod resilience;

pub use client::{CallError, CallOptions, ServiceClient};
pub use config::MeshConfig;
pub use events::{EventBus, EventPublisher, EventSubscriber};
pub use gateway::GatewayRouter;
pub use health::HealthChecker;
pub use http::HttpServer;
pub use lifecycle::{MeshContext, Shutdown};
pub use load_balancer::LoadBalancer;
pub use registry::ServiceRegistry;
pub use resilience::CircuitBreaker;
