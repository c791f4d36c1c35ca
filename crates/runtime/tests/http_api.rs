//! Webhook ingress and control API over real loopback HTTP.

mod common;

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use common::{test_registry, wait_for};
use relay_core::config::ProjectConfig;
use relay_runtime::Runtime;

fn config(state_dir: &Path, module_yaml: &str) -> ProjectConfig {
    let yaml = format!(
        r#"
state_dir: {state}
graceful_stop_ms: 2000
control_api: {{ bind: "127.0.0.1:0" }}
webhook_api: {{ bind: "127.0.0.1:0" }}
modules:
{module_yaml}
"#,
        state = state_dir.display()
    );
    ProjectConfig::from_yaml(&yaml).unwrap()
}

const WEBHOOK_MODULE: &str = r#"
  - name: hooks
    sources:
      - id: inbox
        plugin: webhook
        poll_interval_ms: 600000
    actors:
      - id: a1
        plugin: recording
    loggers:
      - name: memory
        plugin: memory
    routes:
      - name: r1
        when: { source: inbox, events: [message.received] }
        then: { actor: a1 }
"#;

#[tokio::test]
async fn webhook_request_publishes_and_delivers() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, harness) = test_registry(vec![], None);
    let runtime = Runtime::start_with_config(config(dir.path(), WEBHOOK_MODULE), registry)
        .await
        .unwrap();
    let addr = runtime.webhook_addr().unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/hooks/inbox"))
        .json(&json!({ "subject": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let event_id = body["event_ids"][0].as_str().unwrap().to_string();
    assert!(event_id.starts_with("evt_"));

    wait_for(|| harness.deliveries.lock().unwrap().len() == 1).await;
    let (event, _) = harness.deliveries.lock().unwrap()[0].clone();
    assert_eq!(event.id, event_id);
    assert_eq!(event.source_id, "inbox");
    assert_eq!(event.payload["subject"], json!("hello"));
    // Push events never touch the checkpoint store.
    assert!(!dir.path().join("checkpoints/inbox").exists());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_hook_is_404_and_wrong_method_is_405() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _harness) = test_registry(vec![], None);
    let runtime = Runtime::start_with_config(config(dir.path(), WEBHOOK_MODULE), registry)
        .await
        .unwrap();
    let addr = runtime.webhook_addr().unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/hooks/nope"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client
        .get(format!("http://{addr}/hooks/inbox"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_webhook_body_is_4xx_and_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, harness) = test_registry(vec![], None);
    let runtime = Runtime::start_with_config(config(dir.path(), WEBHOOK_MODULE), registry)
        .await
        .unwrap();
    let addr = runtime.webhook_addr().unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/hooks/inbox"))
        .body("definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(harness.deliveries.lock().unwrap().is_empty());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn control_api_reports_status_and_port_file() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _harness) = test_registry(vec![], None);
    let runtime = Runtime::start_with_config(config(dir.path(), WEBHOOK_MODULE), registry)
        .await
        .unwrap();
    let addr = runtime.control_addr().unwrap();

    // The port file points other CLI processes at this runtime.
    let port = std::fs::read_to_string(dir.path().join("runtime.port")).unwrap();
    assert_eq!(port, addr.port().to_string());
    let pid = std::fs::read_to_string(dir.path().join("runtime.pid")).unwrap();
    assert_eq!(pid, std::process::id().to_string());

    let status: Value = reqwest::Client::new()
        .get(format!("http://{addr}/control/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["modules"][0]["name"], json!("hooks"));
    assert_eq!(status["modules"][0]["state"], json!("active"));
    assert_eq!(status["modules"][0]["sources"][0]["id"], json!("inbox"));
    assert_eq!(status["modules"][0]["sources"][0]["status"], json!("healthy"));

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn control_api_unload_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _harness) = test_registry(vec![], None);
    let runtime = Runtime::start_with_config(config(dir.path(), WEBHOOK_MODULE), registry)
        .await
        .unwrap();
    let addr = runtime.control_addr().unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/control/module/unload"))
        .json(&json!({ "name": "hooks" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["state"], json!("removed"));

    let response = client
        .post(format!("http://{addr}/control/module/unload"))
        .json(&json!({ "name": "hooks" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn control_shutdown_stops_the_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().to_path_buf();
    let (registry, _harness) = test_registry(vec![], None);
    let runtime = Arc::new(
        Runtime::start_with_config(config(dir.path(), WEBHOOK_MODULE), registry)
            .await
            .unwrap(),
    );
    let addr = runtime.control_addr().unwrap();

    let waiter = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run_until_shutdown().await })
    };

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/control/shutdown"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    waiter.await.unwrap().unwrap();
    // Clean shutdown removes the state files.
    assert!(!state_dir.join("runtime.port").exists());
    assert!(!state_dir.join("runtime.pid").exists());
}
