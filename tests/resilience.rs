//! Retry, breaker, timeout and failover behaviour through the gateway.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;

use common::{
    base_config, http_client, route, service, start_mesh, start_mock_backend,
    start_programmable_backend,
};

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = start_programmable_backend(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                (503, "busy".to_string())
            } else {
                (200, "finally".to_string())
            }
        }
    })
    .await;

    let mut config = base_config();
    config.services.push(service("flaky", &[&backend]));
    config.routes.push(route("flaky", "/flaky", "flaky"));
    let mesh = start_mesh(config).await;

    let res = http_client().get(mesh.url("/flaky")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "finally");
    assert_eq!(backend.hits(), 3);

    mesh.stop().await;
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let backend = start_programmable_backend(|_| async { (500, "boom".to_string()) }).await;

    let mut config = base_config();
    config.retries.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 5;
    config.services.push(service("broken", &[&backend]));
    config.routes.push(route("broken", "/broken", "broken"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    for _ in 0..5 {
        let res = client.get(mesh.url("/broken")).send().await.unwrap();
        assert_eq!(res.status(), 502);
    }
    assert_eq!(backend.hits(), 5);

    let res = client.get(mesh.url("/broken")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "circuit_open");
    assert_eq!(backend.hits(), 5);

    let breakers = mesh.ctx.breakers.snapshot();
    assert_eq!(breakers.len(), 1);
    assert_eq!(serde_json::to_value(&breakers[0]).unwrap()["state"], "open");

    mesh.stop().await;
}

#[tokio::test]
async fn test_client_errors_pass_through_without_retry() {
    let backend = start_programmable_backend(|_| async { (404, "no such item".to_string()) }).await;

    let mut config = base_config();
    config.services.push(service("catalog", &[&backend]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;

    let res = http_client().get(mesh.url("/catalog/9")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.text().await.unwrap(), "no such item");
    assert_eq!(backend.hits(), 1);

    mesh.stop().await;
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let backend = start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        (200, "late".to_string())
    })
    .await;

    let mut config = base_config();
    config.retries.max_attempts = 2;
    config.services.push(service("slow", &[&backend]));
    let mut slow = route("slow", "/slow", "slow");
    slow.timeout_ms = Some(100);
    config.routes.push(slow);
    let mesh = start_mesh(config).await;

    let started = std::time::Instant::now();
    let res = http_client().get(mesh.url("/slow")).send().await.unwrap();
    assert_eq!(res.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(2));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "upstream_timeout");
    assert!(body["trace_id"].is_string());

    mesh.stop().await;
}

#[tokio::test]
async fn test_failover_after_health_check() {
    let sick = start_programmable_backend(|req| async move {
        if req.path == "/health" {
            (500, "down".to_string())
        } else {
            (200, "sick".to_string())
        }
    })
    .await;
    let well = start_mock_backend("well").await;

    let mut config = base_config();
    config.health_check.unhealthy_threshold = 1;
    config.health_check.timeout_ms = 500;
    config.services.push(service("catalog", &[&sick, &well]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    assert_eq!(mesh.ctx.health.check_all().await, 2);

    for _ in 0..6 {
        let res = client.get(mesh.url("/catalog")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "well");
    }
    assert_eq!(sick.hits(), 0);
    assert_eq!(well.hits(), 6);

    let overall = mesh.ctx.health.overall_stats();
    let overall = serde_json::to_value(&overall).unwrap();
    assert_eq!(overall["unhealthy"], 1);

    mesh.stop().await;
}

#[tokio::test]
async fn test_no_healthy_instance_is_503() {
    let sick = start_programmable_backend(|_| async { (500, "down".to_string()) }).await;

    let mut config = base_config();
    config.health_check.unhealthy_threshold = 1;
    config.services.push(service("catalog", &[&sick]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;

    mesh.ctx.health.check_all().await;

    let res = http_client().get(mesh.url("/catalog")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "no_healthy_instance");
    assert_eq!(sick.hits(), 0);

    mesh.stop().await;
}
