//! End-to-end tests through the HTTP front.

use std::time::Duration;

use resilient_mesh::gateway::{GatewayRequestRecord, GATEWAY_REQUEST_EVENT};

mod common;

use common::{base_config, http_client, route, service, start_mesh, start_mock_backend};

#[tokio::test]
async fn test_round_robin_across_backends() {
    let b1 = start_mock_backend("b1").await;
    let b2 = start_mock_backend("b2").await;
    let b3 = start_mock_backend("b3").await;

    let mut config = base_config();
    config.services.push(service("catalog", &[&b1, &b2, &b3]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    for _ in 0..30 {
        let res = client.get(mesh.url("/catalog/items")).send().await.unwrap();
        assert_eq!(res.status(), 200);
    }

    assert_eq!((b1.hits(), b2.hits(), b3.hits()), (10, 10, 10));
    mesh.stop().await;
}

#[tokio::test]
async fn test_trace_and_request_ids() {
    let backend = start_mock_backend("ok").await;
    let mut config = base_config();
    config.services.push(service("catalog", &[&backend]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    let res = client
        .get(mesh.url("/catalog"))
        .header("x-trace-id", "trace-e2e-1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-trace-id"], "trace-e2e-1");
    assert!(res.headers().contains_key("x-request-id"));

    let seen = backend.last().unwrap();
    assert_eq!(seen.headers["x-trace-id"], "trace-e2e-1");
    assert!(seen.headers.contains_key("x-span-id"));
    assert_eq!(seen.headers["x-forwarded-for"], "127.0.0.1");

    // Without an inbound id the gateway mints one and returns it.
    let res = client.get(mesh.url("/catalog")).send().await.unwrap();
    let minted = res.headers()["x-trace-id"].to_str().unwrap().to_string();
    assert_eq!(minted.len(), 32);
    assert_eq!(backend.last().unwrap().headers["x-trace-id"], minted);

    mesh.stop().await;
}

#[tokio::test]
async fn test_strip_prefix_and_unknown_route() {
    let backend = start_mock_backend("ok").await;
    let mut config = base_config();
    config.services.push(service("orders", &[&backend]));
    let mut orders = route("orders", "/api/v1/orders", "orders");
    orders.strip_prefix = true;
    config.routes.push(orders);
    let mesh = start_mesh(config).await;
    let client = http_client();

    let res = client
        .post(mesh.url("/api/v1/orders/42/cancel?force=true"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let seen = backend.last().unwrap();
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.path, "/42/cancel?force=true");

    let res = client.get(mesh.url("/api/v2/nothing")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "route_not_found");

    mesh.stop().await;
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let backend = start_mock_backend("ok").await;
    let mut config = base_config();
    config.listener.max_body_size = 64;
    config.services.push(service("orders", &[&backend]));
    config.routes.push(route("orders", "/orders", "orders"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    let res = client.post(mesh.url("/orders")).body("x".repeat(65)).send().await.unwrap();
    assert_eq!(res.status(), 413);
    assert_eq!(backend.hits(), 0);

    let res = client.post(mesh.url("/orders")).body("x".repeat(64)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(backend.hits(), 1);

    mesh.stop().await;
}

#[tokio::test]
async fn test_authentication_and_public_paths() {
    let backend = start_mock_backend("ok").await;
    let mut config = base_config();
    config.auth.enabled = true;
    config.auth.tokens = vec!["t0k3n".into()];
    config.auth.public_paths = vec!["/catalog/public*".into()];
    config.services.push(service("catalog", &[&backend]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    let res = client.get(mesh.url("/catalog/items")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(backend.hits(), 0);

    let res = client
        .get(mesh.url("/catalog/items"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(mesh.url("/catalog/items"))
        .bearer_auth("t0k3n")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(backend.last().unwrap().headers["authorization"], "Bearer t0k3n");

    let res = client.get(mesh.url("/catalog/public/banner")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    // The node's own health endpoint never goes through the gateway.
    let res = client.get(mesh.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    mesh.stop().await;
}

#[tokio::test]
async fn test_rate_limited_clients_get_429() {
    let backend = start_mock_backend("ok").await;
    let mut config = base_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 1;
    config.rate_limit.burst_size = 3;
    config.services.push(service("catalog", &[&backend]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    let mut statuses = Vec::new();
    for _ in 0..5 {
        statuses.push(client.get(mesh.url("/catalog")).send().await.unwrap().status().as_u16());
    }
    assert_eq!(&statuses[..3], &[200, 200, 200]);
    assert!(statuses[3..].contains(&429));

    mesh.stop().await;
}

#[tokio::test]
async fn test_admin_api_and_request_events() {
    let backend = start_mock_backend("ok").await;
    let mut config = base_config();
    config.admin.enabled = true;
    config.admin.api_key = "adm1n".into();
    config.admin.bind_address = "127.0.0.1:0".into();
    config.services.push(service("catalog", &[&backend]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    let res = client.get(mesh.admin_url("/admin/services")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(mesh.admin_url("/admin/services"))
        .bearer_auth("adm1n")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let services: serde_json::Value = res.json().await.unwrap();
    assert_eq!(services[0]["name"], "catalog");
    assert_eq!(services[0]["instances"].as_array().unwrap().len(), 1);

    client
        .get(mesh.url("/catalog/x"))
        .header("x-trace-id", "admin-trace")
        .send()
        .await
        .unwrap();

    // The event is published in the background; poll for it.
    let mut events = Vec::new();
    for _ in 0..50 {
        events = mesh.ctx.bus.history(GATEWAY_REQUEST_EVENT, 10).await.unwrap();
        if !events.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].correlation_id, "admin-trace");
    let record: GatewayRequestRecord = events[0].payload_as().unwrap();
    assert_eq!(record.path, "/catalog/x");
    assert_eq!(record.status, 200);

    let res = client
        .get(mesh.admin_url("/admin/events/gateway.request?limit=5"))
        .bearer_auth("adm1n")
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(listed[0]["type"], "gateway.request");

    let res = client
        .get(mesh.admin_url("/admin/breakers"))
        .bearer_auth("adm1n")
        .send()
        .await
        .unwrap();
    let breakers: serde_json::Value = res.json().await.unwrap();
    assert_eq!(breakers[0]["state"], "closed");

    mesh.stop().await;
}

#[tokio::test]
async fn test_admin_registration_changes_routing() {
    let b1 = start_mock_backend("b1").await;
    let b2 = start_mock_backend("b2").await;
    let mut config = base_config();
    config.admin.enabled = true;
    config.admin.api_key = "adm1n".into();
    config.services.push(service("catalog", &[&b1]));
    config.routes.push(route("catalog", "/catalog", "catalog"));
    let mesh = start_mesh(config).await;
    let client = http_client();

    let res = client
        .post(mesh.admin_url("/admin/services/catalog/instances"))
        .bearer_auth("adm1n")
        .json(&serde_json::json!({"host": "127.0.0.1", "port": b2.addr.port()}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    for _ in 0..4 {
        client.get(mesh.url("/catalog")).send().await.unwrap();
    }
    assert_eq!((b1.hits(), b2.hits()), (2, 2));

    let b1_id = format!("127.0.0.1:{}", b1.addr.port());
    let res = client
        .delete(mesh.admin_url(&format!("/admin/services/catalog/instances/{b1_id}")))
        .bearer_auth("adm1n")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);

    for _ in 0..3 {
        client.get(mesh.url("/catalog")).send().await.unwrap();
    }
    assert_eq!((b1.hits(), b2.hits()), (2, 5));

    // Deregistration leaves the breaker record in place.
    let targets: Vec<String> = mesh.ctx.breakers.snapshot().into_iter().map(|b| b.target).collect();
    assert!(targets.contains(&format!("catalog/{b1_id}")), "{targets:?}");

    mesh.stop().await;
}
