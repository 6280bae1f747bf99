//! Gateway errors and their HTTP mapping.

use axum::http::StatusCode;
use thiserror::Error;

use crate::client::CallError;
use crate::gateway::auth::AuthError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matches {path}")]
    RouteNotFound { path: String },

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Call(#[from] CallError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Call(err) => match err {
                CallError::NoHealthyInstance(_) | CallError::CircuitOpen { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                CallError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                CallError::Client(response) => response.status,
                CallError::Request(_) => StatusCode::BAD_REQUEST,
                CallError::Unavailable { .. } | CallError::Decode(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    /// Short machine-readable code for the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "route_not_found",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::Call(CallError::NoHealthyInstance(_)) => "no_healthy_instance",
            GatewayError::Call(CallError::CircuitOpen { .. }) => "circuit_open",
            GatewayError::Call(CallError::Timeout { .. }) => "upstream_timeout",
            GatewayError::Call(CallError::Client(_)) => "upstream_rejected",
            GatewayError::Call(CallError::Request(_)) => "bad_request",
            GatewayError::Call(_) => "bad_gateway",
        }
    }
}
