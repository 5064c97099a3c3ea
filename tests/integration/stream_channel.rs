//! WebSocket channel tests: snapshot, groups and relayed pushes

use std::time::Duration;

use model_monitoring::EntityLifecycleEvent;
use model_monitoring::channel::RelayHandle;
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn mock_runtime() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                { "name": "foo:latest" },
                { "name": "bar:7b" }
            ]
        })))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn test_snapshot_lists_runtime_models() {
    let runtime = mock_runtime().await;
    let (hub, url) = start_server(&runtime.uri()).await;

    let (_client, snapshot) = connect(&url).await;

    assert!(snapshot["connection_id"].is_string());
    assert_eq!(snapshot["entities"], json!(["foo:latest", "bar:7b"]));
    assert_eq!(snapshot["metrics"], json!({}));
    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test]
async fn test_slow_model_listing_does_not_stall_new_connections() {
    let runtime = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "models": [{ "name": "foo:latest" }] }))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&runtime)
        .await;

    let (_hub, url) = start_server(&runtime.uri()).await;

    let started = std::time::Instant::now();
    let (mut client, snapshot) = connect(&url).await;
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "snapshot took {:?}",
        started.elapsed()
    );
    assert_eq!(snapshot["entities"], json!([]));

    send(&mut client, json!({ "type": "join", "group": "models" })).await;
    assert_eq!(next_frame(&mut client).await["type"], "joined");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_group_membership_controls_pushes() {
    let runtime = mock_runtime().await;
    let (hub, url) = start_server(&runtime.uri()).await;

    let (lifecycle_tx, lifecycle_rx) = broadcast::channel(16);
    let relay = RelayHandle::spawn(hub.clone(), lifecycle_rx, hub.metrics().subscribe());

    let (mut member, _) = connect(&url).await;
    let (mut bystander, _) = connect(&url).await;

    send(&mut member, json!({ "type": "join", "group": "models" })).await;
    let joined = next_frame(&mut member).await;
    assert_eq!(joined, json!({ "type": "joined", "group": "models" }));

    lifecycle_tx
        .send(EntityLifecycleEvent::added("foo:latest"))
        .unwrap();

    let frame = next_frame(&mut member).await;
    assert_eq!(frame["type"], "entity_added");
    assert_eq!(frame["entity_id"], "foo:latest");

    assert_silent(&mut bystander, Duration::from_millis(200)).await;

    send(&mut member, json!({ "type": "leave", "group": "models" })).await;
    assert_eq!(next_frame(&mut member).await["type"], "left");

    lifecycle_tx
        .send(EntityLifecycleEvent::removed("foo:latest"))
        .unwrap();
    assert_silent(&mut member, Duration::from_millis(200)).await;

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_metrics_group_receives_updates() {
    let runtime = mock_runtime().await;
    let (hub, url) = start_server(&runtime.uri()).await;

    let (_lifecycle_tx, lifecycle_rx) = broadcast::channel::<EntityLifecycleEvent>(16);
    let relay = RelayHandle::spawn(hub.clone(), lifecycle_rx, hub.metrics().subscribe());

    let (mut client, _) = connect(&url).await;
    send(&mut client, json!({ "type": "join", "group": "metrics" })).await;
    assert_eq!(next_frame(&mut client).await["type"], "joined");

    hub.metrics()
        .record_sample("foo:latest", Duration::from_millis(500), 50);

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "metrics_updated");
    assert_eq!(frame["entity_id"], "foo:latest");
    assert_eq!(frame["metrics"]["average_latency_ms"], 500.0);
    assert_eq!(frame["metrics"]["average_units_per_second"], 100.0);

    send(
        &mut client,
        json!({ "type": "get_metrics", "entity_id": "foo:latest" }),
    )
    .await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "metrics");
    assert_eq!(frame["metrics"]["total_sample_count_ever"], 1);

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_keeps_connection() {
    let runtime = mock_runtime().await;
    let (_hub, url) = start_server(&runtime.uri()).await;

    let (mut client, _) = connect(&url).await;

    send(&mut client, json!({ "type": "dance" })).await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "error");

    send(&mut client, json!({ "type": "join", "group": " " })).await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "error");

    send(&mut client, json!({ "type": "get_all_metrics" })).await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "all_metrics");
}

#[tokio::test]
async fn test_closed_socket_is_unregistered() {
    let runtime = mock_runtime().await;
    let (hub, url) = start_server(&runtime.uri()).await;

    let (client, _) = connect(&url).await;
    assert_eq!(hub.connection_count(), 1);

    drop(client);

    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection was never unregistered");
}

#[tokio::test]
async fn test_closed_socket_leaves_no_group_members() {
    let runtime = mock_runtime().await;
    let (hub, url) = start_server(&runtime.uri()).await;

    let (mut client, _) = connect(&url).await;
    send(&mut client, json!({ "type": "join", "group": "models" })).await;
    send(&mut client, json!({ "type": "join", "group": "metrics" })).await;
    assert_eq!(next_frame(&mut client).await["type"], "joined");
    assert_eq!(next_frame(&mut client).await["type"], "joined");
    assert_eq!(hub.group_members("models").len(), 1);

    client.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection was never unregistered");

    assert!(hub.group_members("models").is_empty());
    assert!(hub.group_members("metrics").is_empty());
}
