//! End-to-end switch scenarios over WebSocket

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn switch_frame(entity_id: &str) -> serde_json::Value {
    json!({
        "type": "request_switch",
        "entity_id": entity_id,
        "requester_id": "alice",
        "session_id": "session-1"
    })
}

#[tokio::test]
async fn test_switch_notifies_everyone() {
    let runtime = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&runtime)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "bar:7b" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "model": "bar:7b", "done": true }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&runtime)
        .await;

    let (_hub, url) = start_server(&runtime.uri()).await;
    let (mut requester, _) = connect(&url).await;
    let (mut observer, _) = connect(&url).await;

    send(&mut requester, switch_frame("bar:7b")).await;

    let advisory = next_frame(&mut observer).await;
    assert_eq!(advisory["type"], "switch_requested");
    assert_eq!(advisory["entity_id"], "bar:7b");
    assert_eq!(advisory["requester_id"], "alice");
    assert_eq!(advisory["session_id"], "session-1");

    let completed = next_frame(&mut observer).await;
    assert_eq!(completed["type"], "switch_completed");
    assert_eq!(completed["entity_id"], "bar:7b");
    assert_eq!(completed["success"], true);

    // The requester does not get the advisory
    let completed = next_frame(&mut requester).await;
    assert_eq!(completed["type"], "switch_completed");

    let response = next_frame(&mut requester).await;
    assert_eq!(response["type"], "switch_response");
    assert_eq!(response["success"], true);
    assert_eq!(response["requester_id"], "alice");
    assert!(response["duration_ms"].as_u64().unwrap() >= 200);

    assert_silent(&mut observer, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_runtime_rejection_still_completes() {
    let runtime = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "model 'ghost:latest' not found"
        })))
        .mount(&runtime)
        .await;

    let (_hub, url) = start_server(&runtime.uri()).await;
    let (mut requester, _) = connect(&url).await;
    let (mut observer, _) = connect(&url).await;

    send(&mut requester, switch_frame("ghost:latest")).await;

    assert_eq!(next_frame(&mut observer).await["type"], "switch_requested");

    let completed = next_frame(&mut observer).await;
    assert_eq!(completed["type"], "switch_completed");
    assert_eq!(completed["success"], false);

    assert_eq!(next_frame(&mut requester).await["type"], "switch_completed");
    let response = next_frame(&mut requester).await;
    assert_eq!(response["type"], "switch_response");
    assert_eq!(response["success"], false);
}

#[tokio::test]
async fn test_unreachable_runtime_only_tells_requester() {
    // Reserve a port, then free it so connections are refused
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let (_hub, url) = start_server(&dead_url).await;
    let (mut requester, snapshot) = connect(&url).await;
    let (mut observer, _) = connect(&url).await;

    assert_eq!(snapshot["entities"], json!([]));

    send(&mut requester, switch_frame("foo:latest")).await;

    let advisory = next_frame(&mut observer).await;
    assert_eq!(advisory["type"], "switch_requested");

    let error = next_frame(&mut requester).await;
    assert_eq!(error["type"], "switch_error");
    assert_eq!(error["entity_id"], "foo:latest");
    assert!(error["error"].is_string());

    assert_silent(&mut observer, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_pushes_flow_during_slow_switch() {
    let runtime = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "done": true }))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&runtime)
        .await;

    let (hub, url) = start_server(&runtime.uri()).await;
    let (mut requester, _) = connect(&url).await;
    let (mut observer, _) = connect(&url).await;

    send(&mut requester, switch_frame("slow:latest")).await;
    assert_eq!(next_frame(&mut observer).await["type"], "switch_requested");

    // Other connections keep being served while the switch is outstanding
    send(&mut observer, json!({ "type": "get_all_metrics" })).await;
    let started = std::time::Instant::now();
    assert_eq!(next_frame(&mut observer).await["type"], "all_metrics");
    assert!(started.elapsed() < Duration::from_millis(600));

    // Direct pushes still reach the requester's socket
    assert!(hub.push_to_all(model_monitoring::channel::ServerMessage::error("ping")) == 2);
    assert_eq!(next_frame(&mut requester).await["type"], "error");

    assert_eq!(next_frame(&mut requester).await["type"], "switch_completed");
    assert_eq!(next_frame(&mut requester).await["type"], "switch_response");
}
