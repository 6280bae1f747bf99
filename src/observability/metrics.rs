//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mesh_gateway_requests_total` (counter): inbound requests by route, status
//! - `mesh_gateway_request_duration_seconds` (histogram): inbound latency
//! - `mesh_calls_total` (counter): outbound calls by service, outcome
//! - `mesh_call_duration_seconds` (histogram): outbound call latency
//! - `mesh_call_retries_total` (counter): retried attempts by service
//! - `mesh_instance_health` (gauge): 1=healthy, 0=unhealthy
//! - `mesh_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `mesh_events_published_total` / `mesh_events_delivered_total` /
//!   `mesh_events_failed_total` (counters) by event type
//! - `mesh_rate_limited_total` (counter)
//!
//! Every function is a no-op until a recorder is installed, so library users
//! and tests pay nothing for them.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_gateway_request(route: &str, status: u16, start: Instant) {
    let route = route.to_string();
    counter!(
        "mesh_gateway_requests_total",
        "route" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("mesh_gateway_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_call(service: &str, outcome: &'static str, start: Instant) {
    counter!("mesh_calls_total", "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("mesh_call_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(service: &str) {
    counter!("mesh_call_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_instance_health(instance: &str, healthy: bool) {
    gauge!("mesh_instance_health", "instance" => instance.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_circuit_state(target: &str, state: f64) {
    gauge!("mesh_circuit_state", "target" => target.to_string()).set(state);
}

pub fn record_event_published(event_type: &str) {
    counter!("mesh_events_published_total", "type" => event_type.to_string()).increment(1);
}

pub fn record_event_delivery(event_type: &str, success: bool) {
    if success {
        counter!("mesh_events_delivered_total", "type" => event_type.to_string()).increment(1);
    } else {
        counter!("mesh_events_failed_total", "type" => event_type.to_string()).increment(1);
    }
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("mesh_rate_limited_total", "reason" => reason).increment(1);
}
