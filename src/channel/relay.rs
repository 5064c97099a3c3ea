//! RelayActor - forwards producer events into hub groups
//!
//! ```text
//! Normalizer ──EntityLifecycleEvent──┐
//!                                    ├→ RelayActor → Hub::push_to_group("models" | "metrics")
//! MetricAggregator ──MetricsUpdate───┘
//! ```
//!
//! The broadcast channels may lag for a slow relay; skipped events are
//! logged and not replayed.

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::EntityLifecycleEvent;
use crate::metrics::MetricsUpdate;

use super::hub::{Hub, METRICS_GROUP, MODELS_GROUP};
use super::messages::ServerMessage;

/// Commands that can be sent to the RelayActor
#[derive(Debug)]
pub enum RelayCommand {
    Shutdown,
}

pub struct RelayActor {
    hub: Hub,
    lifecycle_rx: broadcast::Receiver<EntityLifecycleEvent>,
    metrics_rx: broadcast::Receiver<MetricsUpdate>,
    command_rx: mpsc::Receiver<RelayCommand>,
}

impl RelayActor {
    pub fn new(
        hub: Hub,
        lifecycle_rx: broadcast::Receiver<EntityLifecycleEvent>,
        metrics_rx: broadcast::Receiver<MetricsUpdate>,
        command_rx: mpsc::Receiver<RelayCommand>,
    ) -> Self {
        Self {
            hub,
            lifecycle_rx,
            metrics_rx,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting relay actor");

        let mut lifecycle_open = true;
        let mut metrics_open = true;

        loop {
            tokio::select! {
                event = self.lifecycle_rx.recv(), if lifecycle_open => {
                    match event {
                        Ok(event) => {
                            let delivered = self.hub.push_to_group(MODELS_GROUP, event.into());
                            trace!("lifecycle event relayed to {delivered} connections");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("relay lagged, skipped {skipped} lifecycle events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("lifecycle channel closed");
                            lifecycle_open = false;
                        }
                    }
                }

                update = self.metrics_rx.recv(), if metrics_open => {
                    match update {
                        Ok(update) => {
                            let delivered = self
                                .hub
                                .push_to_group(METRICS_GROUP, ServerMessage::from(update));
                            trace!("metrics update relayed to {delivered} connections");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("relay lagged, skipped {skipped} metric updates");
                        }
                        Err(RecvError::Closed) => {
                            debug!("metrics channel closed");
                            metrics_open = false;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RelayCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("all relay inputs closed, shutting down");
                    break;
                }
            }
        }

        debug!("relay actor stopped");
    }
}

/// Handle for controlling a RelayActor
#[derive(Clone)]
pub struct RelayHandle {
    sender: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub fn spawn(
        hub: Hub,
        lifecycle_rx: broadcast::Receiver<EntityLifecycleEvent>,
        metrics_rx: broadcast::Receiver<MetricsUpdate>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = RelayActor::new(hub, lifecycle_rx, metrics_rx, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RelayCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::hub::tests::StubRuntime;
    use crate::config::MetricsConfig;
    use crate::metrics::MetricAggregator;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_relay_routes_events_by_group() {
        let metrics = MetricAggregator::new(MetricsConfig {
            debounce_ms: 10,
            ..MetricsConfig::default()
        });
        let hub = Hub::new(Arc::new(StubRuntime::ok()), metrics.clone());
        let (lifecycle_tx, lifecycle_rx) = broadcast::channel(16);

        let relay = RelayHandle::spawn(hub.clone(), lifecycle_rx, metrics.subscribe());

        let mut models = hub.connect().await;
        let mut watcher = hub.connect().await;
        hub.join(&models.id, MODELS_GROUP).unwrap();
        hub.join(&watcher.id, METRICS_GROUP).unwrap();
        models.receiver.recv().await.unwrap();
        watcher.receiver.recv().await.unwrap();

        lifecycle_tx
            .send(EntityLifecycleEvent::added("foo:latest"))
            .unwrap();
        metrics.record_sample("foo:latest", Duration::from_secs(1), 10);

        let frame = tokio::time::timeout(Duration::from_secs(1), models.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_matches!(frame, ServerMessage::EntityAdded { entity_id, .. } if entity_id == "foo:latest");

        let frame = tokio::time::timeout(Duration::from_secs(1), watcher.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_matches!(frame, ServerMessage::MetricsUpdated { entity_id, .. } if entity_id == "foo:latest");

        assert!(models.receiver.try_recv().is_err());

        relay.shutdown().await.unwrap();
    }
}
