//! Tests against a real local JSON-RPC backend over TCP.

use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use rpc_resilience::admin::{self, AdminState};
use rpc_resilience::config::ProviderConfig;
use rpc_resilience::{Operation, ResilienceLayer};

mod common;

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_rpc_call_through_layer() {
    let mock = common::MockRpc::start().await;
    let config = common::config_with(vec![ProviderConfig::new("local", mock.url())]);
    let layer = ResilienceLayer::new(config).unwrap();
    layer.start();

    let result = layer
        .execute(
            Operation::new("read"),
            common::rpc_attempt(reqwest::Client::new(), "getSlot"),
        )
        .await
        .unwrap();
    assert_eq!(result, Value::from("ok"));
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1);

    let status = &layer.provider_snapshot()["local"];
    assert_eq!(status.success_count, 1);
    assert!(status.last_response_time_ms.is_some());

    layer.shutdown().await;
}

#[tokio::test]
async fn test_health_probe_tracks_backend() {
    let mock = common::MockRpc::start().await;
    let mut provider = ProviderConfig::new("local", mock.url());
    provider.health_check_interval_ms = 50;
    let mut config = common::config_with(vec![provider]);
    config.health_check.enabled = true;
    config.health_check.timeout_ms = 1_000;
    config.circuit_breaker.failure_threshold = 1_000;

    let layer = ResilienceLayer::new(config).unwrap();
    layer.start();
    assert!(wait_for(|| layer.provider_snapshot()["local"].last_health_check.is_some()).await);
    assert!(layer.provider_snapshot()["local"].healthy);

    mock.set_healthy(false);
    assert!(wait_for(|| !layer.provider_snapshot()["local"].healthy).await);

    mock.set_healthy(true);
    assert!(wait_for(|| layer.provider_snapshot()["local"].healthy).await);

    layer.shutdown().await;
}

#[tokio::test]
async fn test_outcome_log_written_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mock = common::MockRpc::start().await;
    let mut config = common::config_with(vec![ProviderConfig::new("local", mock.url())]);
    config.outcome_log.enabled = true;
    config.outcome_log.directory = dir.path().to_string_lossy().into_owned();

    let layer = ResilienceLayer::new(config).unwrap();
    layer.start();
    let client = reqwest::Client::new();
    for _ in 0..2 {
        layer
            .execute(Operation::new("read"), common::rpc_attempt(client.clone(), "getSlot"))
            .await
            .unwrap();
    }
    layer.shutdown().await;

    let mut lines = Vec::new();
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("outcomes-") && name.ends_with(".jsonl"), "{}", name);
        lines.extend(std::fs::read_to_string(&path).unwrap().lines().map(str::to_owned));
    }
    assert_eq!(lines.len(), 2);

    let record: Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record["provider"], "local");
    assert_eq!(record["operationClass"], "read");
    assert_eq!(record["success"], true);
    assert_eq!(record["attempt"], 1);
}

#[tokio::test]
async fn test_admin_api_serves_snapshots() {
    let mock = common::MockRpc::start().await;
    let config = common::config_with(vec![ProviderConfig::new("local", mock.url())]);
    let layer = Arc::new(ResilienceLayer::new(config).unwrap());
    layer.start();

    let id = layer
        .submit(Operation::new("read"), common::rpc_attempt(reqwest::Client::new(), "getSlot"))
        .unwrap();
    let request_id = id.id();
    id.await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(admin::serve(
        listener,
        AdminState::new(Arc::clone(&layer), "secret"),
        layer.shutdown_signal(),
    ));

    let client = reqwest::Client::new();
    let status: Value = client
        .get(format!("http://{}/admin/status", addr))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["providers"]["total"], 1);

    let request: Value = client
        .get(format!("http://{}/admin/requests/{}", addr, request_id))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(request["status"], "COMPLETED");
    assert_eq!(request["provider"], "local");

    let denied = client
        .get(format!("http://{}/admin/providers", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);

    layer.shutdown().await;
    server.await.unwrap().unwrap();
}
