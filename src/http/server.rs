//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum routers (health + gateway catch-all, admin)
//! - Wire up middleware (trace, timeout, body limit, request id)
//! - Turn axum requests into `InboundRequest`s for the gateway
//! - Serve until the shutdown future resolves

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::gateway::InboundRequest;
use crate::health::OverallHealth;
use crate::lifecycle::MeshContext;
use crate::resilience::CircuitState;

const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub ctx: Arc<MeshContext>,
}

/// HTTP front of a mesh node.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Gateway front: `/health` plus the catch-all gateway route.
    pub fn new(ctx: Arc<MeshContext>) -> Self {
        let router = Self::build_router(AppState { ctx });
        Self { router }
    }

    /// Admin API, served on its own listener.
    pub fn admin(ctx: Arc<MeshContext>) -> Self {
        let state = AppState { ctx };
        let router = admin::setup_admin_router(state.clone())
            .with_state(state)
            .layer(TraceLayer::new_for_http());
        Self { router }
    }

    /// The complete router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = &state.ctx.config;
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route("/health", get(health_handler))
            .fallback(gateway_handler)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
            .with_state(state)
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    instances: OverallHealth,
    open_circuits: usize,
}

/// Liveness plus a summary of what the node can reach.
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    let instances = state.ctx.health.overall_stats();
    let open_circuits = state
        .ctx
        .breakers
        .snapshot()
        .iter()
        .filter(|b| b.state == CircuitState::Open)
        .count();
    let status = if instances.instances > 0 && instances.healthy + instances.unknown == 0 {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.ctx.uptime().as_secs(),
        instances,
        open_circuits,
    })
}

/// Everything not claimed by another route goes through the gateway.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.ctx.config.listener.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let inbound = InboundRequest::new(parts.method, parts.uri, parts.headers, body, peer)
        .trust_proxies(&state.ctx.config.listener.trusted_proxies);
    state.ctx.gateway.handle(inbound).await
}
