//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the mesh.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::load_balancer::Algorithm;

/// Root configuration for the mesh.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MeshConfig {
    /// Gateway listener configuration.
    pub listener: ListenerConfig,

    /// Logical services and their statically known instances.
    pub services: Vec<ServiceConfig>,

    /// Routing rules mapping inbound requests to services.
    pub routes: Vec<RouteConfig>,

    /// Load balancing defaults.
    pub load_balancer: LoadBalancerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Circuit breaker settings (applied per target).
    pub circuit_breaker: CircuitBreakerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Gateway authentication.
    pub auth: AuthConfig,

    /// Event bus settings.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Proxies whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    /// Empty means the socket peer is always the client.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_body_size: 2 * 1024 * 1024,
            trusted_proxies: Vec::new(),
        }
    }
}

/// A logical service and its instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Logical service name.
    pub name: String,

    /// Algorithm override for this service.
    #[serde(default)]
    pub algorithm: Option<Algorithm>,

    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

/// A single instance of a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub host: String,
    pub port: u16,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Route configuration mapping inbound requests to a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Target service name.
    pub service: String,

    /// Strip the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Require an authenticated caller.
    #[serde(default = "default_true")]
    pub require_auth: bool,

    /// Per-attempt upstream timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

fn default_true() -> bool {
    true
}

/// Load balancing defaults.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Algorithm used for services without an override.
    pub algorithm: Algorithm,
}

/// Kind of probe issued by the health checker.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    #[default]
    HttpGet,
    HttpPost,
    TcpConnect,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Probe kind.
    pub probe: ProbeKind,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy again.
    /// 1 means fast recovery; larger values damp flapping.
    pub healthy_threshold: u32,

    /// Deregister an instance after this many consecutive failures.
    pub evict_after: Option<u32>,

    /// Health records retained per instance.
    pub history_size: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_ms: 5_000,
            probe: ProbeKind::HttpGet,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 1,
            evict_after: None,
            history_size: 100,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking.
    pub enabled: bool,

    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,

    /// Rolling window for failure counting in seconds.
    pub window_secs: u64,

    /// Time the circuit stays open before allowing trial calls, in seconds.
    pub cool_down_secs: u64,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,

    /// Consecutive trial successes needed to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            window_secs: 60,
            cool_down_secs: 30,
            half_open_max_calls: 1,
            success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-attempt upstream call timeout in milliseconds.
    pub call_ms: u64,

    /// Inbound request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_ms: 10_000,
            request_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per call (including the first).
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained requests per second per caller.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 100,
            burst_size: 50,
        }
    }
}

/// Gateway authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable authentication.
    pub enabled: bool,

    /// Bearer tokens accepted by the built-in static authenticator.
    pub tokens: Vec<String>,

    /// Paths that never require authentication. A trailing `*` matches a prefix.
    pub public_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tokens: Vec::new(),
            public_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Append-only log file. `None` keeps events in memory only.
    pub log_path: Option<String>,

    /// Drop persisted events older than this many seconds.
    pub retention_secs: Option<u64>,

    /// Keep at most this many persisted events.
    pub max_events: Option<usize>,

    /// Retention enforcement interval in seconds.
    pub compaction_interval_secs: u64,

    /// Delivery attempts per handler before an event is given up on.
    pub max_delivery_attempts: u32,

    /// Identity stamped as `source` on events published by this process.
    pub source: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            retention_secs: Some(7 * 24 * 3600),
            max_events: None,
            compaction_interval_secs: 3600,
            max_delivery_attempts: 3,
            source: "gateway".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON logs instead of human-readable lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // Placeholder; deployments set their own key.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
