//! Wire protocol of the broadcast channel
//!
//! Frames are JSON objects tagged by `"type"`. Client frames are
//! invocations; server frames are pushes or direct replies.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsUpdate;
use crate::runtime::SwitchOutcome;
use crate::{AggregatedMetrics, EntityLifecycleEvent, LifecycleKind};

/// Invocations a connection can make
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        group: String,
    },
    Leave {
        group: String,
    },
    RequestSwitch {
        entity_id: String,
        requester_id: String,
        session_id: String,
    },
    GetMetrics {
        entity_id: String,
    },
    GetAllMetrics,
}

/// Full result of a switch, as sent to the requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchResult {
    pub entity_id: String,
    pub success: bool,
    pub message: String,
    pub requester_id: String,
    pub session_id: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl SwitchResult {
    pub fn new(
        entity_id: &str,
        requester_id: &str,
        session_id: &str,
        outcome: SwitchOutcome,
    ) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            success: outcome.success,
            message: outcome.message,
            requester_id: requester_id.to_string(),
            session_id: session_id.to_string(),
            duration_ms: outcome.duration_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Frames pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after the connection is established
    Snapshot {
        connection_id: String,
        entities: Vec<String>,
        metrics: HashMap<String, AggregatedMetrics>,
        timestamp: DateTime<Utc>,
    },
    EntityAdded {
        entity_id: String,
        timestamp: DateTime<Utc>,
    },
    /// `entity_id` may be the `<model>:*` wildcard
    EntityRemoved {
        entity_id: String,
        timestamp: DateTime<Utc>,
    },
    MetricsUpdated {
        entity_id: String,
        metrics: AggregatedMetrics,
        timestamp: DateTime<Utc>,
    },
    /// Advisory: a switch is in progress
    SwitchRequested {
        entity_id: String,
        requester_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    SwitchCompleted(SwitchResult),
    /// Requester-only copy of the result
    SwitchResponse(SwitchResult),
    /// Requester-only; the group never learns about the failure
    SwitchError {
        entity_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Joined {
        group: String,
    },
    Left {
        group: String,
    },
    Metrics {
        entity_id: String,
        metrics: Option<AggregatedMetrics>,
    },
    AllMetrics {
        metrics: HashMap<String, AggregatedMetrics>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::EntityAdded { .. } => "entity_added",
            ServerMessage::EntityRemoved { .. } => "entity_removed",
            ServerMessage::MetricsUpdated { .. } => "metrics_updated",
            ServerMessage::SwitchRequested { .. } => "switch_requested",
            ServerMessage::SwitchCompleted(_) => "switch_completed",
            ServerMessage::SwitchResponse(_) => "switch_response",
            ServerMessage::SwitchError { .. } => "switch_error",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::Left { .. } => "left",
            ServerMessage::Metrics { .. } => "metrics",
            ServerMessage::AllMetrics { .. } => "all_metrics",
            ServerMessage::Error { .. } => "error",
        }
    }
}

impl From<EntityLifecycleEvent> for ServerMessage {
    fn from(event: EntityLifecycleEvent) -> Self {
        match event.kind {
            LifecycleKind::Added => ServerMessage::EntityAdded {
                entity_id: event.entity_id,
                timestamp: event.timestamp,
            },
            LifecycleKind::Removed => ServerMessage::EntityRemoved {
                entity_id: event.entity_id,
                timestamp: event.timestamp,
            },
        }
    }
}

impl From<MetricsUpdate> for ServerMessage {
    fn from(update: MetricsUpdate) -> Self {
        ServerMessage::MetricsUpdated {
            entity_id: update.entity_id,
            metrics: update.metrics,
            timestamp: update.timestamp,
        }
    }
}
