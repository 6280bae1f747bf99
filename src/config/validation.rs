//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference declared services)
//! - Validate value ranges (thresholds > 0, unique instances)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MeshConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::MeshConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("duplicate instance {instance} in service {service}")]
    DuplicateInstance { service: String, instance: String },

    #[error("duplicate service {0}")]
    DuplicateService(String),

    #[error("route {route} references undeclared service {service}")]
    UnknownService { route: String, service: String },

    #[error("route {0} has neither host nor path_prefix")]
    EmptyRoute(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &MeshConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let mut declared = HashSet::new();
    for service in &config.services {
        if !declared.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        let mut seen = HashSet::new();
        for inst in &service.instances {
            if !seen.insert((inst.host.as_str(), inst.port)) {
                errors.push(ValidationError::DuplicateInstance {
                    service: service.name.clone(),
                    instance: format!("{}:{}", inst.host, inst.port),
                });
            }
        }
    }

    for route in &config.routes {
        if route.host.is_none() && route.path_prefix.is_none() {
            errors.push(ValidationError::EmptyRoute(route.name.clone()));
        }
        // Services may also be registered at runtime, so only flag routes
        // when services are declared statically.
        if !config.services.is_empty() && !declared.contains(route.service.as_str()) {
            errors.push(ValidationError::UnknownService {
                route: route.name.clone(),
                service: route.service.clone(),
            });
        }
    }

    let positive: [(&'static str, u64); 6] = [
        ("retries.max_attempts", config.retries.max_attempts as u64),
        ("health_check.unhealthy_threshold", config.health_check.unhealthy_threshold as u64),
        ("health_check.healthy_threshold", config.health_check.healthy_threshold as u64),
        ("circuit_breaker.failure_threshold", config.circuit_breaker.failure_threshold as u64),
        ("circuit_breaker.half_open_max_calls", config.circuit_breaker.half_open_max_calls as u64),
        ("circuit_breaker.success_threshold", config.circuit_breaker.success_threshold as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }
    if config.events.max_delivery_attempts == 0 {
        errors.push(ValidationError::Zero("events.max_delivery_attempts"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.admin.enabled {
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "admin.bind_address",
                value: config.admin.bind_address.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
