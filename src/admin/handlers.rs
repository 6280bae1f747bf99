use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::config::RouteConfig;
use crate::events::{BusStats, Event};
use crate::gateway::RouteStats;
use crate::health::{HealthRecord, HealthStats, OverallHealth};
use crate::http::server::AppState;
use crate::load_balancer::Algorithm;
use crate::registry::InstanceSnapshot;
use crate::resilience::BreakerSnapshot;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1_000;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub health: OverallHealth,
    pub events: BusStats,
}

#[derive(Serialize)]
pub struct ServiceView {
    pub name: String,
    pub algorithm: Algorithm,
    pub instances: Vec<InstanceSnapshot>,
}

#[derive(Deserialize)]
pub struct RegisterInstance {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Serialize)]
pub struct InstanceHealth {
    pub stats: Option<HealthStats>,
    pub records: Vec<HealthRecord>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.ctx.uptime().as_secs(),
        health: state.ctx.health.overall_stats(),
        events: state.ctx.bus.stats(),
    })
}

pub async fn get_services(State(state): State<AppState>) -> Json<Vec<ServiceView>> {
    let ctx = &state.ctx;
    let views = ctx
        .registry
        .services()
        .into_iter()
        .map(|name| ServiceView {
            algorithm: ctx.balancer.algorithm_for(&name),
            instances: ctx.registry.list(&name).iter().map(|i| i.snapshot()).collect(),
            name,
        })
        .collect();
    Json(views)
}

pub async fn register_instance(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(body): Json<RegisterInstance>,
) -> Response {
    if body.host.trim().is_empty() || body.port == 0 {
        return error(StatusCode::BAD_REQUEST, "host and port are required");
    }
    let instance = state
        .ctx
        .registry
        .register_endpoint(&service, &body.host, body.port, body.weight.max(1));
    (StatusCode::CREATED, Json(instance.snapshot())).into_response()
}

pub async fn deregister_instance(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
) -> Response {
    match state.ctx.registry.deregister(&service, &instance_id) {
        // The breaker record is kept; a re-registered instance resumes it.
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error(StatusCode::NOT_FOUND, format!("{service}/{instance_id} is not registered")),
    }
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.ctx.breakers.snapshot())
}

pub async fn get_routes(State(state): State<AppState>) -> Json<Vec<RouteStats>> {
    Json(state.ctx.gateway.route_stats())
}

pub async fn put_route(State(state): State<AppState>, Json(route): Json<RouteConfig>) -> Response {
    if route.name.trim().is_empty() || (route.host.is_none() && route.path_prefix.is_none()) {
        return error(StatusCode::BAD_REQUEST, "route needs a name and a host or path_prefix");
    }
    state.ctx.gateway.add_route(route);
    StatusCode::NO_CONTENT.into_response()
}

pub async fn delete_route(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if state.ctx.gateway.remove_route(&name) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error(StatusCode::NOT_FOUND, format!("route {name} not found"))
    }
}

pub async fn get_events(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Response {
    match state.ctx.bus.history(&event_type, query.limit()).await {
        Ok(events) => Json::<Vec<Event>>(events).into_response(),
        Err(e) => {
            tracing::error!(event_type = %event_type, error = %e, "Failed to read event history");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub async fn get_instance_health(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
    Query(query): Query<LimitQuery>,
) -> Response {
    if state.ctx.registry.get(&service, &instance_id).is_none() {
        return error(StatusCode::NOT_FOUND, format!("{service}/{instance_id} is not registered"));
    }
    Json(InstanceHealth {
        stats: state.ctx.health.stats(&service, &instance_id),
        records: state.ctx.health.history(&service, &instance_id, query.limit()),
    })
    .into_response()
}
