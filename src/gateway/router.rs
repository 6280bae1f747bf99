//! Gateway request pipeline.
//!
//! # Responsibilities
//! - Hold the route table (priority ordered, swapped atomically on reload)
//! - Authenticate, rate-limit and trace each inbound request
//! - Forward through `ServiceClient` and translate the outcome to HTTP
//! - Emit one `gateway.request` event per request
//!
//! # Design Decisions
//! - First match wins; ties keep configuration order
//! - Readers never block on reload (`ArcSwap`)
//! - Event emission is fire and forget; the response never waits on it

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::{CallError, CallOptions, OutboundRequest, OutboundResponse, ServiceClient};
use crate::config::{MeshConfig, RouteConfig};
use crate::events::EventPublisher;
use crate::gateway::auth::{Authenticator, Principal, PublicPaths, StaticTokenAuthenticator};
use crate::gateway::error::GatewayError;
use crate::gateway::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::request::InboundRequest;
use crate::observability::{metrics, TraceContext, SPAN_ID_HEADER, TRACE_ID_HEADER};
use crate::registry::InstanceSnapshot;

/// Event type emitted once per gateway request.
pub const GATEWAY_REQUEST_EVENT: &str = "gateway.request";

/// Headers that describe one hop and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A compiled routing rule.
#[derive(Debug)]
pub struct Route {
    config: RouteConfig,
    matcher: AndMatcher,
    prefix: Option<PathPrefixMatcher>,
}

impl Route {
    pub fn compile(config: RouteConfig) -> Self {
        let mut matcher = AndMatcher::new();
        if let Some(host) = &config.host {
            matcher = matcher.with(HostMatcher::new(host));
        }
        let prefix = config.path_prefix.as_deref().map(PathPrefixMatcher::new);
        if let Some(prefix) = &prefix {
            matcher = matcher.with(prefix.clone());
        }
        Self {
            config,
            matcher,
            prefix,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn service(&self) -> &str {
        &self.config.service
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn matches(&self, req: &InboundRequest) -> bool {
        self.matcher.matches(req)
    }

    /// Path and query sent upstream, with the prefix removed when configured.
    pub fn upstream_path(&self, req: &InboundRequest) -> String {
        let path = req.path();
        let stripped = match (&self.prefix, self.config.strip_prefix) {
            (Some(prefix), true) => path.strip_prefix(prefix.prefix()).unwrap_or(path),
            _ => path,
        };
        let mut upstream = if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{stripped}")
        };
        if let Some(query) = req.query() {
            upstream.push('?');
            upstream.push_str(query);
        }
        upstream
    }
}

/// Immutable, priority-sorted set of routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(configs: Vec<RouteConfig>) -> Self {
        let mut routes: Vec<Arc<Route>> = configs.into_iter().map(|c| Arc::new(Route::compile(c))).collect();
        // Stable: equal priorities keep configuration order.
        routes.sort_by(|a, b| b.config.priority.cmp(&a.config.priority));
        Self { routes }
    }

    pub fn find(&self, req: &InboundRequest) -> Option<Arc<Route>> {
        self.routes.iter().find(|r| r.matches(req)).cloned()
    }

    pub fn configs(&self) -> Vec<RouteConfig> {
        self.routes.iter().map(|r| r.config.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[derive(Debug, Default)]
struct RouteCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Per-route traffic summary with the target service's instances.
#[derive(Debug, Clone, Serialize)]
pub struct RouteStats {
    pub name: String,
    pub service: String,
    pub path_prefix: Option<String>,
    pub priority: u32,
    pub requests: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub instances: Vec<InstanceSnapshot>,
}

/// Payload of the `gateway.request` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequestRecord {
    pub route: Option<String>,
    pub service: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

/// Routes inbound requests to services.
#[derive(Debug)]
pub struct GatewayRouter {
    routes: ArcSwap<RouteTable>,
    client: ServiceClient,
    authenticator: Option<Arc<dyn Authenticator>>,
    public_paths: PublicPaths,
    rate_limiter: Option<RateLimiter>,
    publisher: Option<EventPublisher>,
    request_deadline: Option<Duration>,
    counters: DashMap<String, Arc<RouteCounters>>,
}

impl GatewayRouter {
    pub fn new(routes: Vec<RouteConfig>, client: ServiceClient) -> Self {
        Self {
            routes: ArcSwap::from_pointee(RouteTable::new(routes)),
            client,
            authenticator: None,
            public_paths: PublicPaths::default(),
            rate_limiter: None,
            publisher: None,
            request_deadline: None,
            counters: DashMap::new(),
        }
    }

    pub fn from_config(config: &MeshConfig, client: ServiceClient, publisher: Option<EventPublisher>) -> Self {
        let mut router = Self::new(config.routes.clone(), client)
            .with_public_paths(PublicPaths::from(&config.auth))
            .with_request_deadline(Duration::from_secs(config.timeouts.request_secs));
        if config.auth.enabled {
            router = router.with_authenticator(Arc::new(StaticTokenAuthenticator::new(
                config.auth.tokens.iter().cloned(),
            )));
        }
        if let Some(limiter) = RateLimiter::from_config(&config.rate_limit) {
            router = router.with_rate_limiter(limiter);
        }
        if let Some(publisher) = publisher {
            router = router.with_publisher(publisher);
        }
        router
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_public_paths(mut self, public_paths: PublicPaths) -> Self {
        self.public_paths = public_paths;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Budget for the whole upstream call, retries included.
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = Some(deadline);
        self
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// Replace the whole route table atomically.
    pub fn reload_routes(&self, routes: Vec<RouteConfig>) {
        let table = RouteTable::new(routes);
        tracing::info!(routes = table.len(), "Route table reloaded");
        self.routes.store(Arc::new(table));
    }

    /// Add a route, replacing any route with the same name.
    pub fn add_route(&self, route: RouteConfig) {
        tracing::info!(route = %route.name, service = %route.service, "Adding route");
        self.routes.rcu(|table| {
            let mut configs = table.configs();
            configs.retain(|c| c.name != route.name);
            configs.push(route.clone());
            RouteTable::new(configs)
        });
    }

    pub fn remove_route(&self, name: &str) -> bool {
        let mut removed = false;
        self.routes.rcu(|table| {
            let mut configs = table.configs();
            let before = configs.len();
            configs.retain(|c| c.name != name);
            removed = configs.len() != before;
            RouteTable::new(configs)
        });
        if removed {
            self.counters.remove(name);
            tracing::info!(route = %name, "Removed route");
        }
        removed
    }

    /// Current routes in match order.
    pub fn routes(&self) -> Vec<RouteConfig> {
        self.routes.load().configs()
    }

    pub fn route_stats(&self) -> Vec<RouteStats> {
        let table = self.routes.load();
        let registry = self.client.balancer().registry();
        table
            .routes
            .iter()
            .map(|route| {
                let counters = self.counters.get(route.name()).map(|c| c.value().clone());
                let (requests, failures, latency_us) = counters.map_or((0, 0, 0), |c| {
                    (
                        c.requests.load(Ordering::Relaxed),
                        c.failures.load(Ordering::Relaxed),
                        c.total_latency_us.load(Ordering::Relaxed),
                    )
                });
                RouteStats {
                    name: route.name().to_string(),
                    service: route.service().to_string(),
                    path_prefix: route.config.path_prefix.clone(),
                    priority: route.config.priority,
                    requests,
                    failures,
                    avg_latency_ms: if requests == 0 {
                        0.0
                    } else {
                        latency_us as f64 / requests as f64 / 1000.0
                    },
                    instances: registry.list(route.service()).iter().map(|i| i.snapshot()).collect(),
                }
            })
            .collect()
    }

    /// Run one inbound request through the pipeline.
    pub async fn handle(&self, req: InboundRequest) -> Response {
        let start = Instant::now();
        let trace = TraceContext::from_headers(&req.headers);
        let route = self.routes.load().find(&req);

        let mut principal = None;
        let result = match &route {
            Some(route) => self.forward(route, &req, &trace, &mut principal).await,
            None => Err(GatewayError::RouteNotFound {
                path: req.path().to_string(),
            }),
        };

        let mut response = match result {
            Ok(upstream) => upstream_response(upstream),
            Err(GatewayError::Call(CallError::Client(upstream))) => upstream_response(*upstream),
            Err(err) => {
                tracing::warn!(
                    trace_id = %trace.correlation_id,
                    method = %req.method,
                    path = %req.path(),
                    route = route.as_ref().map(|r| r.name()).unwrap_or("none"),
                    error = %err,
                    "Gateway request failed"
                );
                error_response(&err, &trace)
            }
        };
        if let Ok(value) = HeaderValue::from_str(&trace.correlation_id) {
            response.headers_mut().insert(TRACE_ID_HEADER, value);
        }

        let status = response.status();
        let elapsed = start.elapsed();
        let route_label = route.as_ref().map_or("none", |r| r.name());
        metrics::record_gateway_request(route_label, status.as_u16(), start);
        if let Some(route) = &route {
            self.count(route.name(), status, elapsed);
        }
        tracing::debug!(
            trace_id = %trace.correlation_id,
            method = %req.method,
            path = %req.path(),
            route = route_label,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Gateway request"
        );

        self.emit(
            GatewayRequestRecord {
                route: route.as_ref().map(|r| r.name().to_string()),
                service: route.as_ref().map(|r| r.service().to_string()),
                method: req.method.to_string(),
                path: req.path().to_string(),
                status: status.as_u16(),
                duration_ms: elapsed.as_millis() as u64,
                client_ip: req.client_ip.clone(),
                principal: principal.map(|p: Principal| p.id),
            },
            trace,
        );
        response
    }

    async fn forward(
        &self,
        route: &Route,
        req: &InboundRequest,
        trace: &TraceContext,
        principal_out: &mut Option<Principal>,
    ) -> Result<OutboundResponse, GatewayError> {
        let principal = self.authenticate(route, req)?;
        *principal_out = principal.clone();

        if let Some(limiter) = &self.rate_limiter {
            let key = principal.as_ref().map_or(req.client_ip.as_str(), |p| p.id.as_str());
            if !limiter.check(key) {
                tracing::warn!(client = %key, route = %route.name(), "Rate limit exceeded");
                metrics::record_rate_limited("gateway");
                return Err(GatewayError::RateLimited);
            }
        }

        let outbound = OutboundRequest {
            method: req.method.clone(),
            path: route.upstream_path(req),
            headers: forward_headers(req),
            body: req.body.clone(),
        };

        let mut options = CallOptions::new()
            .trace(trace.clone())
            .affinity_key(req.client_ip.clone());
        let token = principal.map(|p| p.token).or_else(|| req.bearer_token().map(str::to_string));
        if let Some(token) = token {
            options = options.auth_token(token);
        }
        if let Some(ms) = route.config.timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }
        if let Some(deadline) = self.request_deadline {
            options = options.deadline(deadline);
        }

        Ok(self.client.call_with(route.service(), outbound, options).await?)
    }

    /// `Ok(None)` when the request needs no credentials.
    fn authenticate(&self, route: &Route, req: &InboundRequest) -> Result<Option<Principal>, GatewayError> {
        let Some(authenticator) = &self.authenticator else {
            return Ok(None);
        };
        if !route.config.require_auth || self.public_paths.is_public(req.path()) {
            return Ok(None);
        }
        Ok(Some(authenticator.authenticate(req)?))
    }

    fn count(&self, route: &str, status: StatusCode, elapsed: Duration) {
        let counters = match self.counters.get(route) {
            Some(c) => c.value().clone(),
            None => self.counters.entry(route.to_string()).or_default().value().clone(),
        };
        counters.requests.fetch_add(1, Ordering::Relaxed);
        if status.is_server_error() {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .total_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn emit(&self, record: GatewayRequestRecord, trace: TraceContext) {
        let Some(publisher) = self.publisher.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(GATEWAY_REQUEST_EVENT, &record, Some(&trace)).await {
                tracing::warn!(trace_id = %trace.correlation_id, error = %e, "Failed to publish gateway event");
            }
        });
    }
}

/// Inbound headers minus hop-by-hop, host, credentials and trace headers
/// (the client sets its own), plus `X-Forwarded-For`.
///
/// A forwarded chain is only extended when the client address was taken
/// from it; otherwise it is replaced by the peer.
fn forward_headers(req: &InboundRequest) -> HeaderMap {
    let mut headers = req.headers.clone();
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::AUTHORIZATION);
    headers.remove(TRACE_ID_HEADER);
    headers.remove(SPAN_ID_HEADER);

    let peer = req.peer.map(|p| p.ip().to_string());
    let forwarded = match (headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()), &peer) {
        (Some(chain), Some(peer)) if *peer != req.client_ip => format!("{chain}, {peer}"),
        _ => req.client_ip.clone(),
    };
    headers.remove("x-forwarded-for");
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
    headers
}

fn upstream_response(upstream: OutboundResponse) -> Response {
    let mut headers = upstream.headers;
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::CONTENT_LENGTH);

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = headers;
    response
}

fn error_response(err: &GatewayError, trace: &TraceContext) -> Response {
    let body = serde_json::json!({
        "error": err.code(),
        "message": err.to_string(),
        "trace_id": trace.correlation_id,
    });
    (err.status(), Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Transport, TransportError};
    use crate::events::{handler_fn, BusSettings, Event, EventBus, HandlerError, MemoryEventLog};
    use crate::load_balancer::{Algorithm, LoadBalancer};
    use crate::registry::{ServiceInstance, ServiceRegistry};
    use crate::resilience::{BreakerSettings, CircuitBreakers, RetryPolicy};
    use async_trait::async_trait;
    use axum::body::Bytes;
    use axum::http::{Method, Uri};
    use parking_lot::Mutex;
    use std::net::IpAddr;
    use tokio::sync::mpsc;

    /// Answers with a fixed status and records what it was sent.
    #[derive(Debug)]
    struct Upstream {
        status: Mutex<u16>,
        seen: Mutex<Vec<(String, OutboundRequest)>>,
    }

    impl Upstream {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status: Mutex::new(status),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> (String, OutboundRequest) {
            self.seen.lock().last().cloned().unwrap()
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Transport for Upstream {
        async fn send(
            &self,
            instance: &ServiceInstance,
            request: OutboundRequest,
        ) -> Result<OutboundResponse, TransportError> {
            self.seen.lock().push((instance.instance_id(), request));
            let status = *self.status.lock();
            if status == 0 {
                return Err(TransportError::Connect("refused".into()));
            }
            Ok(OutboundResponse::new(StatusCode::from_u16(status).unwrap(), "{\"ok\":true}"))
        }
    }

    fn route(name: &str, prefix: &str, service: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            host: None,
            path_prefix: Some(prefix.into()),
            service: service.into(),
            strip_prefix: false,
            require_auth: true,
            timeout_ms: None,
            priority: 0,
        }
    }

    fn gateway(upstream: Arc<Upstream>, routes: Vec<RouteConfig>) -> GatewayRouter {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_endpoint("orders", "127.0.0.1", 9101, 1);
        registry.register_endpoint("users", "127.0.0.1", 9201, 1);
        let balancer = Arc::new(LoadBalancer::new(registry, Algorithm::RoundRobin));
        let breakers = Arc::new(CircuitBreakers::new(BreakerSettings::default()));
        let client = ServiceClient::new(balancer, breakers, upstream).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        });
        GatewayRouter::new(routes, client)
    }

    fn get(path: &'static str) -> InboundRequest {
        get_from(path, "192.168.1.20:4000")
    }

    fn get_from(path: &'static str, peer: &str) -> InboundRequest {
        InboundRequest::new(
            Method::GET,
            Uri::from_static(path),
            HeaderMap::new(),
            Bytes::new(),
            Some(peer.parse().unwrap()),
        )
    }

    /// Rebuilds the request so the resolved client address sees the header.
    fn with_header(req: InboundRequest, name: &'static str, value: &'static str) -> InboundRequest {
        let mut headers = req.headers;
        headers.insert(name, HeaderValue::from_static(value));
        InboundRequest::new(req.method, req.uri, headers, req.body, req.peer)
    }

    #[tokio::test]
    async fn test_routes_by_priority_then_order() {
        let upstream = Upstream::new(200);
        let mut catch_all = route("catch-all", "/", "users");
        catch_all.priority = 0;
        let mut orders = route("orders", "/api/orders", "orders");
        orders.priority = 10;
        let gw = gateway(upstream.clone(), vec![catch_all, orders]);

        let response = gw.handle(get("/api/orders/7")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.last().0, "127.0.0.1:9101");

        gw.handle(get("/api/users")).await;
        assert_eq!(upstream.last().0, "127.0.0.1:9201");
    }

    #[tokio::test]
    async fn test_no_route_is_404_with_trace_header() {
        let gw = gateway(Upstream::new(200), vec![route("orders", "/api/orders", "orders")]);
        let response = gw.handle(get("/nope")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(TRACE_ID_HEADER));
    }

    #[tokio::test]
    async fn test_strip_prefix_keeps_query() {
        let upstream = Upstream::new(200);
        let mut r = route("orders", "/api/orders", "orders");
        r.strip_prefix = true;
        let gw = gateway(upstream.clone(), vec![r]);

        gw.handle(get("/api/orders/7/items?limit=5")).await;
        assert_eq!(upstream.last().1.path, "/7/items?limit=5");

        gw.handle(get("/api/orders")).await;
        assert_eq!(upstream.last().1.path, "/");
    }

    #[tokio::test]
    async fn test_inbound_trace_id_is_propagated() {
        let upstream = Upstream::new(200);
        let gw = gateway(upstream.clone(), vec![route("orders", "/api/orders", "orders")]);

        let req = with_header(get("/api/orders"), "x-trace-id", "trace-abc");
        let response = gw.handle(req).await;

        assert_eq!(response.headers().get(TRACE_ID_HEADER).unwrap(), "trace-abc");
        let (_, sent) = upstream.last();
        assert_eq!(sent.headers.get(TRACE_ID_HEADER).unwrap(), "trace-abc");
        assert!(sent.headers.contains_key(SPAN_ID_HEADER));
        assert_eq!(sent.headers.get("x-forwarded-for").unwrap(), "192.168.1.20");
    }

    #[tokio::test]
    async fn test_forwarded_for_from_untrusted_peer_is_replaced() {
        let upstream = Upstream::new(200);
        let gw = gateway(upstream.clone(), vec![route("orders", "/api/orders", "orders")]);

        gw.handle(with_header(get("/api/orders"), "x-forwarded-for", "6.6.6.6")).await;
        let (_, sent) = upstream.last();
        assert_eq!(sent.headers.get("x-forwarded-for").unwrap(), "192.168.1.20");

        let proxied = with_header(get_from("/api/orders", "10.0.0.2:5000"), "x-forwarded-for", "1.2.3.4")
            .trust_proxies(&["10.0.0.2".parse().unwrap()]);
        gw.handle(proxied).await;
        let (_, sent) = upstream.last();
        assert_eq!(sent.headers.get("x-forwarded-for").unwrap(), "1.2.3.4, 10.0.0.2");
    }

    #[tokio::test]
    async fn test_authentication() {
        let upstream = Upstream::new(200);
        let gw = gateway(upstream.clone(), vec![route("orders", "/api/orders", "orders")])
            .with_authenticator(Arc::new(StaticTokenAuthenticator::new(["secret"])))
            .with_public_paths(PublicPaths::new(["/api/orders/public*"]));

        let response = gw.handle(get("/api/orders")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(upstream.calls(), 0);

        let response = gw
            .handle(with_header(get("/api/orders"), "authorization", "Bearer secret"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let (_, sent) = upstream.last();
        assert_eq!(sent.headers.get(header::AUTHORIZATION).unwrap(), "Bearer secret");

        let response = gw.handle(get("/api/orders/public/catalog")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit_by_client_ip() {
        let gw = gateway(Upstream::new(200), vec![route("orders", "/api/orders", "orders")])
            .with_rate_limiter(RateLimiter::new(1, 2));

        assert_eq!(gw.handle(get("/api/orders")).await.status(), StatusCode::OK);
        assert_eq!(gw.handle(get("/api/orders")).await.status(), StatusCode::OK);
        assert_eq!(
            gw.handle(get("/api/orders")).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        let other = get_from("/api/orders", "192.168.1.21:4000");
        assert_eq!(gw.handle(other).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_spoofed_forwarded_for_does_not_reset_bucket() {
        let gw = gateway(Upstream::new(200), vec![route("orders", "/api/orders", "orders")])
            .with_rate_limiter(RateLimiter::new(1, 2));
        let proxy: IpAddr = "10.0.0.2".parse().unwrap();

        for _ in 0..2 {
            assert_eq!(gw.handle(get("/api/orders")).await.status(), StatusCode::OK);
        }
        for spoofed in ["10.9.9.9", "10.9.9.10", "10.9.9.11"] {
            let req = with_header(get("/api/orders"), "x-forwarded-for", spoofed)
                .trust_proxies(&[proxy]);
            assert_eq!(gw.handle(req).await.status(), StatusCode::TOO_MANY_REQUESTS);
        }

        // Through a trusted proxy the forwarded client gets its own bucket.
        let proxied = with_header(get_from("/api/orders", "10.0.0.2:5000"), "x-forwarded-for", "10.9.9.9")
            .trust_proxies(&[proxy]);
        assert_eq!(proxied.client_ip, "10.9.9.9");
        assert_eq!(gw.handle(proxied).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upstream_errors_map_to_status() {
        let upstream = Upstream::new(404);
        let gw = gateway(upstream.clone(), vec![route("orders", "/api/orders", "orders")]);

        let response = gw.handle(get("/api/orders")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "4xx passes through");

        *upstream.status.lock() = 500;
        let response = gw.handle(get("/api/orders")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        *upstream.status.lock() = 0;
        let response = gw.handle(get("/api/orders")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_no_healthy_instance_is_503() {
        let gw = gateway(Upstream::new(200), vec![route("ghost", "/ghost", "ghost")]);
        let response = gw.handle(get("/ghost")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_route_management_and_stats() {
        let upstream = Upstream::new(200);
        let gw = gateway(upstream, vec![route("orders", "/api/orders", "orders")]);

        gw.add_route(route("users", "/api/users", "users"));
        assert_eq!(gw.routes().len(), 2);
        assert_eq!(gw.handle(get("/api/users")).await.status(), StatusCode::OK);

        let stats = gw.route_stats();
        let users = stats.iter().find(|s| s.name == "users").unwrap();
        assert_eq!(users.requests, 1);
        assert_eq!(users.instances.len(), 1);

        assert!(gw.remove_route("users"));
        assert!(!gw.remove_route("users"));
        assert_eq!(gw.handle(get("/api/users")).await.status(), StatusCode::NOT_FOUND);

        gw.reload_routes(vec![route("users", "/api/users", "users")]);
        assert_eq!(gw.routes().len(), 1);
        assert_eq!(gw.handle(get("/api/orders")).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_emits_gateway_request_event() {
        let bus = Arc::new(EventBus::new(Arc::new(MemoryEventLog::new()), BusSettings::default()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            GATEWAY_REQUEST_EVENT,
            "test",
            handler_fn(move |event: Event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event);
                    Ok::<(), HandlerError>(())
                }
            }),
        );

        let gw = gateway(Upstream::new(200), vec![route("orders", "/api/orders", "orders")])
            .with_publisher(EventPublisher::new(bus, "gateway"));
        let req = with_header(get("/api/orders/1"), "x-trace-id", "corr-1");
        gw.handle(req).await;

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.correlation_id, "corr-1");
        let record: GatewayRequestRecord = event.payload_as().unwrap();
        assert_eq!(record.route.as_deref(), Some("orders"));
        assert_eq!(record.status, 200);
        assert_eq!(record.client_ip, "192.168.1.20");
    }
}
