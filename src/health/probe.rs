//! Health probes.
//!
//! A probe never fails: transport errors, timeouts and non-2xx answers all
//! come back as an unhealthy [`ProbeOutcome`].

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;

use crate::config::{HealthCheckConfig, ProbeKind};
use crate::registry::ServiceInstance;

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub latency: Duration,
    pub detail: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency,
            detail: None,
        }
    }

    pub fn unhealthy(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency,
            detail: Some(detail.into()),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync + fmt::Debug {
    async fn check(&self, instance: &Arc<ServiceInstance>) -> ProbeOutcome;
}

/// HTTP probe: healthy iff a 2xx arrives within the timeout.
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    method: Method,
    path: String,
    timeout: Duration,
}

impl fmt::Debug for HttpProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProbe")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpProbe {
    pub fn new(method: Method, path: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            method,
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, instance: &Arc<ServiceInstance>) -> ProbeOutcome {
        let started = Instant::now();
        let uri = format!("{}{}", instance.base_url(), self.path);

        let request = match Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .header("user-agent", "resilient-mesh-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => return ProbeOutcome::unhealthy(started.elapsed(), e.to_string()),
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => {
                ProbeOutcome::healthy(started.elapsed())
            }
            Ok(Ok(response)) => ProbeOutcome::unhealthy(
                started.elapsed(),
                format!("status {}", response.status()),
            ),
            Ok(Err(e)) => ProbeOutcome::unhealthy(started.elapsed(), e.to_string()),
            Err(_) => ProbeOutcome::unhealthy(started.elapsed(), "timeout"),
        }
    }
}

/// TCP probe: healthy iff the connection completes within the timeout.
#[derive(Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, instance: &Arc<ServiceInstance>) -> ProbeOutcome {
        let started = Instant::now();
        let addr = (instance.host.as_str(), instance.port);
        match time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => ProbeOutcome::healthy(started.elapsed()),
            Ok(Err(e)) => ProbeOutcome::unhealthy(started.elapsed(), e.to_string()),
            Err(_) => ProbeOutcome::unhealthy(started.elapsed(), "timeout"),
        }
    }
}

type CheckFn = dyn Fn(Arc<ServiceInstance>) -> BoxFuture<'static, bool> + Send + Sync;

/// Custom async predicate, bounded by the probe timeout.
pub struct FnProbe {
    check: Box<CheckFn>,
    timeout: Duration,
}

impl fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProbe").field("timeout", &self.timeout).finish()
    }
}

impl FnProbe {
    pub fn new<F>(timeout: Duration, check: F) -> Self
    where
        F: Fn(Arc<ServiceInstance>) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self {
            check: Box::new(check),
            timeout,
        }
    }
}

#[async_trait]
impl Probe for FnProbe {
    async fn check(&self, instance: &Arc<ServiceInstance>) -> ProbeOutcome {
        let started = Instant::now();
        match time::timeout(self.timeout, (self.check)(instance.clone())).await {
            Ok(true) => ProbeOutcome::healthy(started.elapsed()),
            Ok(false) => ProbeOutcome::unhealthy(started.elapsed(), "check returned false"),
            Err(_) => ProbeOutcome::unhealthy(started.elapsed(), "timeout"),
        }
    }
}

/// Probe described by the health check configuration.
pub fn probe_from_config(config: &HealthCheckConfig) -> Arc<dyn Probe> {
    match config.probe {
        ProbeKind::HttpGet => Arc::new(HttpProbe::new(Method::GET, &config.path, config.timeout())),
        ProbeKind::HttpPost => Arc::new(HttpProbe::new(Method::POST, &config.path, config.timeout())),
        ProbeKind::TcpConnect => Arc::new(TcpProbe::new(config.timeout())),
    }
}
