//! Connection registry, group index and client invocations
//!
//! Every connection owns a bounded outbound queue. Pushes resolve their
//! recipients at push time and never wait on a slow client: a full or
//! closed queue drops the frame.
//!
//! Invocations of one connection are expected to run strictly one after
//! another (the transport awaits each before reading the next frame);
//! different connections run concurrently.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::metrics::MetricAggregator;
use crate::runtime::RuntimeInventory;

use super::messages::{ClientMessage, ServerMessage, SwitchResult};

pub type ConnectionId = String;

/// Outbound frames buffered per connection before pushes are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How long a new connection waits for the model list before its snapshot
/// goes out without one
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(500);

/// Group receiving `EntityAdded` / `EntityRemoved`
pub const MODELS_GROUP: &str = "models";

/// Group receiving `MetricsUpdated`
pub const METRICS_GROUP: &str = "metrics";

/// A newly established connection
pub struct Connection {
    pub id: ConnectionId,

    /// Frames to write to the client, starting with the snapshot
    pub receiver: mpsc::Receiver<ServerMessage>,
}

struct ConnectionEntry {
    sender: mpsc::Sender<ServerMessage>,
    groups: DashSet<String>,
}

/// Shared broadcast hub
///
/// Cheap to clone; all clones see the same connections.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

struct Inner {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    groups: DashMap<String, DashSet<ConnectionId>>,
    runtime: Arc<dyn RuntimeInventory>,
    metrics: MetricAggregator,
    queue_capacity: usize,
    snapshot_timeout: Duration,
}

impl Hub {
    pub fn new(runtime: Arc<dyn RuntimeInventory>, metrics: MetricAggregator) -> Self {
        Self::with_queue_capacity(runtime, metrics, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        runtime: Arc<dyn RuntimeInventory>,
        metrics: MetricAggregator,
        queue_capacity: usize,
    ) -> Self {
        Self::with_limits(runtime, metrics, queue_capacity, DEFAULT_SNAPSHOT_TIMEOUT)
    }

    pub fn with_limits(
        runtime: Arc<dyn RuntimeInventory>,
        metrics: MetricAggregator,
        queue_capacity: usize,
        snapshot_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: DashMap::new(),
                groups: DashMap::new(),
                runtime,
                metrics,
                queue_capacity: queue_capacity.max(1),
                snapshot_timeout,
            }),
        }
    }

    pub fn metrics(&self) -> &MetricAggregator {
        &self.inner.metrics
    }

    /// Register a connection and queue its state snapshot.
    ///
    /// The connection is registered before the snapshot is built, so no
    /// push is missed; a switch broadcast may therefore precede it. The
    /// model list is bounded by the snapshot timeout; a slow runtime yields
    /// a snapshot without entities.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Connection {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.inner.queue_capacity);

        self.inner.connections.insert(
            id.clone(),
            ConnectionEntry {
                sender,
                groups: DashSet::new(),
            },
        );
        info!(connection = %id, "connection established");

        let listing =
            tokio::time::timeout(self.inner.snapshot_timeout, self.inner.runtime.list_entities())
                .await;

        let entities = match listing {
            Ok(Ok(entities)) => entities,
            Ok(Err(e)) => {
                warn!(connection = %id, "snapshot without model list: {e}");
                vec![]
            }
            Err(_) => {
                warn!(
                    connection = %id,
                    "model list took longer than {:?}, snapshot without it",
                    self.inner.snapshot_timeout
                );
                vec![]
            }
        };

        self.send_to(
            &id,
            ServerMessage::Snapshot {
                connection_id: id.clone(),
                entities,
                metrics: self.inner.metrics.get_all_metrics(),
                timestamp: Utc::now(),
            },
        );

        Connection { id, receiver }
    }

    /// Drop a connection and all of its group memberships
    pub fn disconnect(&self, connection_id: &str) {
        let Some((_, entry)) = self.inner.connections.remove(connection_id) else {
            return;
        };

        for group in entry.groups.iter() {
            self.remove_member(group.key(), connection_id);
        }

        info!(connection = connection_id, "connection closed");
    }

    /// Add `connection_id` to `group`; only the connection itself calls this
    pub fn join(&self, connection_id: &str, group: &str) -> Result<()> {
        if group.trim().is_empty() {
            bail!("group name must not be empty");
        }

        let Some(entry) = self.inner.connections.get(connection_id) else {
            bail!("unknown connection {connection_id}");
        };
        entry.groups.insert(group.to_string());
        drop(entry);

        self.inner
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(connection_id.to_string());

        // A disconnect may have raced past the membership insert above
        if !self.is_connected(connection_id) {
            self.remove_member(group, connection_id);
            bail!("connection {connection_id} closed while joining {group}");
        }

        debug!(connection = connection_id, group, "joined group");
        Ok(())
    }

    /// Remove `connection_id` from `group`; leaving a group twice is a no-op
    pub fn leave(&self, connection_id: &str, group: &str) -> Result<()> {
        let Some(entry) = self.inner.connections.get(connection_id) else {
            bail!("unknown connection {connection_id}");
        };
        entry.groups.remove(group);
        drop(entry);

        self.remove_member(group, connection_id);

        debug!(connection = connection_id, group, "left group");
        Ok(())
    }

    fn remove_member(&self, group: &str, connection_id: &str) {
        if let Some(members) = self.inner.groups.get(group) {
            members.remove(connection_id);
        }
        self.inner
            .groups
            .remove_if(group, |_, members| members.is_empty());
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.inner.connections.contains_key(connection_id)
    }

    /// Current members of `group`
    pub fn group_members(&self, group: &str) -> HashSet<ConnectionId> {
        self.inner
            .groups
            .get(group)
            .map(|members| members.iter().map(|id| id.key().clone()).collect())
            .unwrap_or_default()
    }

    /// Send a frame to one connection. Returns whether it was queued.
    pub fn send_to(&self, connection_id: &str, message: ServerMessage) -> bool {
        let Some(sender) = self
            .inner
            .connections
            .get(connection_id)
            .map(|entry| entry.sender.clone())
        else {
            trace!(connection = connection_id, "send to unknown connection dropped");
            return false;
        };

        deliver(connection_id, &sender, message)
    }

    /// Push to the members of `group` at this moment
    pub fn push_to_group(&self, group: &str, message: ServerMessage) -> usize {
        let members = self.group_members(group);
        self.push_to(members.iter().map(String::as_str), message)
    }

    /// Push to every connection
    pub fn push_to_all(&self, message: ServerMessage) -> usize {
        self.push_to_all_except(None, message)
    }

    /// Push to every connection but `excluded`
    pub fn push_to_others(&self, excluded: &str, message: ServerMessage) -> usize {
        self.push_to_all_except(Some(excluded), message)
    }

    fn push_to_all_except(&self, excluded: Option<&str>, message: ServerMessage) -> usize {
        let targets: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)> = self
            .inner
            .connections
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != excluded)
            .map(|entry| (entry.key().clone(), entry.sender.clone()))
            .collect();

        let kind = message.kind();
        let delivered = targets
            .iter()
            .filter(|(id, sender)| deliver(id, sender, message.clone()))
            .count();

        trace!("pushed {kind} to {delivered} connections");
        delivered
    }

    fn push_to<'a>(&self, ids: impl Iterator<Item = &'a str>, message: ServerMessage) -> usize {
        let kind = message.kind();
        let delivered = ids
            .filter(|id| self.send_to(id, message.clone()))
            .count();

        trace!("pushed {kind} to {delivered} connections");
        delivered
    }

    /// Parse and handle one text frame from `connection_id`
    pub async fn handle_frame(&self, connection_id: &str, frame: &str) {
        match serde_json::from_str::<ClientMessage>(frame) {
            Ok(message) => self.handle(connection_id, message).await,
            Err(e) => {
                warn!(connection = connection_id, "malformed frame: {e}");
                self.send_to(
                    connection_id,
                    ServerMessage::error(format!("malformed request: {e}")),
                );
            }
        }
    }

    /// Handle one invocation.
    ///
    /// Errors and panics are logged and reported to the caller as an
    /// `error` frame; they never tear down the connection.
    #[instrument(skip(self, message))]
    pub async fn handle(&self, connection_id: &str, message: ClientMessage) {
        let result = AssertUnwindSafe(self.dispatch(connection_id, message))
            .catch_unwind()
            .await;

        let reason = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => String::from("internal error while handling request"),
        };

        error!("request failed: {reason}");
        self.send_to(connection_id, ServerMessage::error(reason));
    }

    async fn dispatch(&self, connection_id: &str, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Join { group } => {
                self.join(connection_id, &group)?;
                self.send_to(connection_id, ServerMessage::Joined { group });
            }

            ClientMessage::Leave { group } => {
                self.leave(connection_id, &group)?;
                self.send_to(connection_id, ServerMessage::Left { group });
            }

            ClientMessage::RequestSwitch {
                entity_id,
                requester_id,
                session_id,
            } => {
                self.request_switch(connection_id, &entity_id, &requester_id, &session_id)
                    .await;
            }

            ClientMessage::GetMetrics { entity_id } => {
                let metrics = self.inner.metrics.get_metrics(&entity_id);
                self.send_to(connection_id, ServerMessage::Metrics { entity_id, metrics });
            }

            ClientMessage::GetAllMetrics => {
                let metrics = self.inner.metrics.get_all_metrics();
                self.send_to(connection_id, ServerMessage::AllMetrics { metrics });
            }
        }

        Ok(())
    }

    /// Switch the runtime to `entity_id` on behalf of `connection_id`.
    ///
    /// 1. `SwitchRequested` to every other connection
    /// 2. the runtime call (unbounded latency)
    /// 3. `SwitchCompleted` to everyone, `SwitchResponse` to the requester
    ///
    /// If the runtime call fails only the requester hears about it, via
    /// `SwitchError`; the others keep the advisory.
    #[instrument(skip(self))]
    pub async fn request_switch(
        &self,
        connection_id: &str,
        entity_id: &str,
        requester_id: &str,
        session_id: &str,
    ) {
        let notified = self.push_to_others(
            connection_id,
            ServerMessage::SwitchRequested {
                entity_id: entity_id.to_string(),
                requester_id: requester_id.to_string(),
                session_id: session_id.to_string(),
                timestamp: Utc::now(),
            },
        );
        debug!("switch advisory sent to {notified} connections");

        match self.inner.runtime.switch_to(entity_id, session_id).await {
            Ok(outcome) => {
                let result = SwitchResult::new(entity_id, requester_id, session_id, outcome);
                info!(
                    success = result.success,
                    duration_ms = result.duration_ms,
                    "switch finished"
                );

                self.push_to_all(ServerMessage::SwitchCompleted(result.clone()));
                self.send_to(connection_id, ServerMessage::SwitchResponse(result));
            }
            Err(e) => {
                warn!("switch failed: {e}");
                self.send_to(
                    connection_id,
                    ServerMessage::SwitchError {
                        entity_id: entity_id.to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    },
                );
            }
        }
    }

    /// Close every connection
    pub fn shutdown(&self) {
        let count = self.inner.connections.len();
        self.inner.connections.clear();
        self.inner.groups.clear();
        info!("closed {count} connections");
    }
}

fn deliver(connection_id: &str, sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(message)) => {
            warn!(
                connection = connection_id,
                "outbound queue full, dropping {}",
                message.kind()
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            trace!(connection = connection_id, "connection closing, frame dropped");
            false
        }
    }
}
