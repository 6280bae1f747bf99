//! Resilient mesh node.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────────────┐
//!                 │                        MESH NODE                          │
//!                 │                                                           │
//!   Client  ─────▶│  http ──▶ gateway ──▶ client ──▶ load_balancer ──▶ registry│
//!                 │   │        │  auth     │ breaker     │ strategies          │
//!                 │   │        │  limits   │ retries     │                     │
//!                 │   │        ▼           ▼             ▼                     │──▶ Service
//!                 │   │     events ◀── publisher      health checker ──▶ probes│    instances
//!                 │   │     (log + subscribers)                                │
//!                 │   └── admin (registry, breakers, routes, event history)    │
//!                 │                                                           │
//!                 │  config (TOML, hot reload) · observability · lifecycle    │
//!                 └───────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use resilient_mesh::config::loader::load_config;
use resilient_mesh::config::watcher::ConfigWatcher;
use resilient_mesh::config::MeshConfig;
use resilient_mesh::lifecycle::{next_signal, MeshContext, Shutdown, Signal};
use resilient_mesh::observability::{logging::init_logging, metrics::init_metrics};
use resilient_mesh::HttpServer;

/// Grace period for background tasks once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "resilient-mesh", version, about = "Service mesh node with an API gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Disable hot reload of routes when the config file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => MeshConfig::default(),
    };
    init_logging(&config.observability);

    if args.check {
        tracing::info!(
            services = config.services.len(),
            routes = config.routes.len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilient-mesh starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let ctx = Arc::new(MeshContext::build(config).await?);
    let mut shutdown = Shutdown::new();
    ctx.spawn_background(&mut shutdown);

    // Kept alive for the lifetime of the process.
    let _watcher = match (&args.config, args.no_watch) {
        (Some(path), false) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let ctx = ctx.clone();
            let mut stop = shutdown.subscribe();
            shutdown.track(
                "config-reload",
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            Some(config) = updates.recv() => ctx.apply_reload(&config),
                            _ = stop.recv() => break,
                        }
                    }
                }),
            );
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        _ => None,
    };

    let listener = TcpListener::bind(&ctx.config.listener.bind_address).await?;
    let server = HttpServer::new(ctx.clone());
    let mut stop = shutdown.subscribe();
    let gateway_task = tokio::spawn(server.run(listener, async move {
        let _ = stop.recv().await;
    }));

    let admin_task = if ctx.config.admin.enabled {
        let listener = TcpListener::bind(&ctx.config.admin.bind_address).await?;
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(HttpServer::admin(ctx.clone()).run(listener, async move {
            let _ = stop.recv().await;
        })))
    } else {
        None
    };

    loop {
        match next_signal().await {
            Signal::Reload => match &args.config {
                Some(path) => match load_config(path) {
                    Ok(config) => ctx.apply_reload(&config),
                    Err(e) => tracing::error!(error = %e, "Reload failed, keeping current routes"),
                },
                None => tracing::info!("No config file to reload"),
            },
            Signal::Shutdown => break,
        }
    }

    tracing::info!("Shutting down");
    let finished = shutdown.drain(SHUTDOWN_GRACE).await;
    tracing::debug!(finished, "Background tasks stopped");

    if let Err(e) = gateway_task.await? {
        tracing::error!(error = %e, "Gateway listener failed");
    }
    if let Some(task) = admin_task {
        if let Err(e) = task.await? {
            tracing::error!(error = %e, "Admin listener failed");
        }
    }
    ctx.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
