pub mod api;
pub mod channel;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod util;
pub mod watcher;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed request outcome for one model
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSample {
    /// Composite `<model>:<tag>` identifier
    pub entity_id: String,

    /// When the request completed
    pub timestamp: DateTime<Utc>,

    /// Wall time the request took
    pub latency: Duration,

    /// Produced units (tokens). Negative counts are kept as given.
    pub unit_count: i64,
}

impl PerformanceSample {
    pub fn new(
        entity_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        latency: Duration,
        unit_count: i64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            latency,
            unit_count,
        }
    }

    /// Throughput of this single sample.
    ///
    /// A zero latency yields `f64::INFINITY` regardless of the unit count.
    pub fn units_per_second(&self) -> f64 {
        let secs = self.latency.as_secs_f64();
        if secs == 0.0 {
            return f64::INFINITY;
        }
        self.unit_count as f64 / secs
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Derived per-entity performance summary
///
/// Not authoritative: it is recomputed from the sample window and cached.
/// Infinite throughput values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub average_latency_ms: f64,
    pub average_units_per_second: f64,
    pub total_sample_count_ever: u64,
    pub last_seen_at: DateTime<Utc>,
}

/// Kind of inventory change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Added,
    Removed,
}

/// Normalized inventory change crossing the boundary to consumers
///
/// `entity_id` is `<model>:<tag>`, or `<model>:*` when a whole model
/// directory disappeared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLifecycleEvent {
    pub kind: LifecycleKind,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
}

impl EntityLifecycleEvent {
    pub fn added(entity_id: impl Into<String>) -> Self {
        Self {
            kind: LifecycleKind::Added,
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn removed(entity_id: impl Into<String>) -> Self {
        Self {
            kind: LifecycleKind::Removed,
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sentinel tag used for whole-model removals
pub const WILDCARD_TAG: &str = "*";

/// Build the composite `<model>:<tag>` identifier
pub fn entity_id(model: &str, tag: &str) -> String {
    format!("{model}:{tag}")
}
