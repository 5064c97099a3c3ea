//! Watcher tests against a real directory tree

use std::fs;
use std::time::Duration;

use model_monitoring::watcher::WatcherHandle;
use model_monitoring::{EntityLifecycleEvent, LifecycleKind};
use tokio::sync::broadcast;

use crate::helpers::fast_watcher_config;

async fn next_event(rx: &mut broadcast::Receiver<EntityLifecycleEvent>) -> EntityLifecycleEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a lifecycle event")
        .unwrap()
}

async fn assert_no_event(rx: &mut broadcast::Receiver<EntityLifecycleEvent>, wait: Duration) {
    if let Ok(Ok(event)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("unexpected lifecycle event: {event:?}");
    }
}

#[tokio::test]
async fn test_new_model_directory_is_announced_once() {
    let root = tempfile::tempdir().unwrap();
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let watcher = WatcherHandle::spawn(fast_watcher_config(root.path()), event_tx);

    // The tag file lands right after its directory, like a pull does
    let model_dir = root.path().join("foo");
    fs::create_dir(&model_dir).unwrap();
    fs::write(model_dir.join("latest"), b"{}").unwrap();

    let event = next_event(&mut event_rx).await;
    assert_eq!(event.kind, LifecycleKind::Added);
    assert_eq!(event.entity_id, "foo:latest");

    assert_no_event(&mut event_rx, Duration::from_millis(500)).await;

    watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tag_added_to_existing_model() {
    let root = tempfile::tempdir().unwrap();
    let model_dir = root.path().join("bar");
    fs::create_dir(&model_dir).unwrap();

    let (event_tx, mut event_rx) = broadcast::channel(64);
    let watcher = WatcherHandle::spawn(fast_watcher_config(root.path()), event_tx);

    fs::write(model_dir.join("7b"), b"{}").unwrap();

    let event = next_event(&mut event_rx).await;
    assert_eq!(event.kind, LifecycleKind::Added);
    assert_eq!(event.entity_id, "bar:7b");

    fs::remove_file(model_dir.join("7b")).unwrap();

    let event = next_event(&mut event_rx).await;
    assert_eq!(event.kind, LifecycleKind::Removed);
    assert_eq!(event.entity_id, "bar:7b");

    watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removed_model_directory_uses_wildcard() {
    let root = tempfile::tempdir().unwrap();
    let model_dir = root.path().join("baz");
    fs::create_dir(&model_dir).unwrap();

    let (event_tx, mut event_rx) = broadcast::channel(64);
    let watcher = WatcherHandle::spawn(fast_watcher_config(root.path()), event_tx);

    fs::remove_dir(&model_dir).unwrap();

    let event = next_event(&mut event_rx).await;
    assert_eq!(event.kind, LifecycleKind::Removed);
    assert_eq!(event.entity_id, "baz:*");

    watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_root_leaves_watcher_idle() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("not-there");

    let (event_tx, mut event_rx) = broadcast::channel(64);
    let watcher = WatcherHandle::spawn(fast_watcher_config(&missing), event_tx);

    assert_no_event(&mut event_rx, Duration::from_millis(200)).await;

    watcher.shutdown().await.unwrap();
}
