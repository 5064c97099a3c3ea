//! Helper functions for integration tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use model_monitoring::api::{ApiConfig, ApiState, spawn_api_server};
use model_monitoring::channel::{Hub, hub::DEFAULT_QUEUE_CAPACITY};
use model_monitoring::config::{MetricsConfig, RuntimeConfig, WatcherConfig};
use model_monitoring::metrics::MetricAggregator;
use model_monitoring::runtime::OllamaRuntime;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Watcher config with short settle delays rooted at `root`
pub fn fast_watcher_config(root: &Path) -> WatcherConfig {
    WatcherConfig {
        enabled: true,
        root: root.to_path_buf(),
        dir_settle_ms: 50,
        tag_settle_ms: 100,
    }
}

pub fn runtime_config(url: &str) -> RuntimeConfig {
    RuntimeConfig {
        url: url.to_string(),
        timeout_secs: 600,
        ..RuntimeConfig::default()
    }
}

/// Start an API server on an ephemeral port backed by an Ollama runtime at `runtime_url`
pub async fn start_server(runtime_url: &str) -> (Hub, String) {
    let runtime_config = runtime_config(runtime_url);
    let runtime = OllamaRuntime::new(&runtime_config).unwrap();
    let metrics = MetricAggregator::new(MetricsConfig {
        debounce_ms: 20,
        ..MetricsConfig::default()
    });
    let hub = Hub::with_limits(
        Arc::new(runtime),
        metrics,
        DEFAULT_QUEUE_CAPACITY,
        runtime_config.snapshot_timeout(),
    );

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enable_cors: false,
    };
    let addr = spawn_api_server(config, ApiState::new(hub.clone()))
        .await
        .unwrap();

    (hub, format!("ws://{addr}/api/v1/stream"))
}

/// Connect and consume the initial snapshot
pub async fn connect(url: &str) -> (Client, Value) {
    let (mut client, _) = connect_async(url).await.unwrap();
    let snapshot = next_frame(&mut client).await;
    assert_eq!(snapshot["type"], "snapshot");
    (client, snapshot)
}

pub async fn send(client: &mut Client, frame: Value) {
    client.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next text frame as JSON, failing the test after `FRAME_TIMEOUT`
pub async fn next_frame(client: &mut Client) -> Value {
    tokio::time::timeout(FRAME_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Assert nothing arrives within `wait`
pub async fn assert_silent(client: &mut Client, wait: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = tokio::time::timeout(wait, client.next()).await {
        panic!("unexpected frame: {text}");
    }
}
