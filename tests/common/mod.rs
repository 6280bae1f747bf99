//! Shared utilities for integration tests.
#![allow(dead_code)]

use axum::http::StatusCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use resilient_mesh::config::{InstanceConfig, MeshConfig, RouteConfig, ServiceConfig};
use resilient_mesh::lifecycle::{MeshContext, Shutdown};
use resilient_mesh::HttpServer;

/// What a mock backend saw.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
}

pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockBackend {
    /// Requests other than health probes.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<SeenRequest> {
        self.seen.lock().iter().rev().find(|r| r.path != "/health").cloned()
    }

    pub fn instance(&self) -> InstanceConfig {
        InstanceConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            weight: 1,
        }
    }
}

/// Backend that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> MockBackend {
    start_programmable_backend(move |_| async move { (200, body.to_string()) }).await
}

/// Backend whose answer is computed per request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> MockBackend
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let (task_hits, task_seen) = (hits.clone(), seen.clone());
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let (f, hits, seen) = (f.clone(), task_hits.clone(), task_seen.clone());
            tokio::spawn(async move {
                let _ = serve_connection(socket, f, hits, seen).await;
            });
        }
    });

    MockBackend { addr, hits, seen }
}

async fn serve_connection<F, Fut>(
    mut socket: TcpStream,
    f: Arc<F>,
    hits: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
) -> std::io::Result<()>
where
    F: Fn(SeenRequest) -> Fut,
    Fut: Future<Output = (u16, String)>,
{
    let Some(request) = read_request(&mut socket).await? else {
        return Ok(());
    };
    if request.path != "/health" {
        hits.fetch_add(1, Ordering::SeqCst);
    }
    seen.lock().push(request.clone());

    let (status, body) = f(request).await;
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<SeenRequest>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body_read = buf.len() - header_end;
    while body_read < content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    Ok(Some(SeenRequest {
        method,
        path,
        headers,
    }))
}

/// Quiet defaults for tests: no probes, no metrics, fast retries.
pub fn base_config() -> MeshConfig {
    let mut config = MeshConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.health_check.enabled = false;
    config.observability.metrics_enabled = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.timeouts.call_ms = 2_000;
    config
}

pub fn service(name: &str, backends: &[&MockBackend]) -> ServiceConfig {
    ServiceConfig {
        name: name.into(),
        algorithm: None,
        instances: backends.iter().map(|b| b.instance()).collect(),
    }
}

pub fn route(name: &str, prefix: &str, service: &str) -> RouteConfig {
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

/// A running node: gateway listener plus optional admin listener.
pub struct TestMesh {
    pub ctx: Arc<MeshContext>,
    pub addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    shutdown: Shutdown,
}

impl TestMesh {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr.expect("admin not enabled"), path)
    }

    pub async fn stop(self) {
        self.shutdown.drain(Duration::from_secs(2)).await;
        self.ctx.close().await;
    }
}

pub async fn start_mesh(config: MeshConfig) -> TestMesh {
    let ctx = Arc::new(MeshContext::build(config).await.unwrap());
    let mut shutdown = Shutdown::new();
    ctx.spawn_background(&mut shutdown);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut stop = shutdown.subscribe();
    let server = HttpServer::new(ctx.clone());
    tokio::spawn(server.run(listener, async move {
        let _ = stop.recv().await;
    }));

    let admin_addr = if ctx.config.admin.enabled {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let admin_addr = listener.local_addr().unwrap();
        let mut stop = shutdown.subscribe();
        tokio::spawn(HttpServer::admin(ctx.clone()).run(listener, async move {
            let _ = stop.recv().await;
        }));
        Some(admin_addr)
    } else {
        None
    };

    TestMesh {
        ctx,
        addr,
        admin_addr,
        shutdown,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
