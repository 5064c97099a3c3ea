//! Per-model performance telemetry
//!
//! Samples are kept in a bounded, insertion-ordered window per model
//! (default capacity 1000). Summaries are derived from that window and
//! cached until new samples arrive.

pub mod aggregator;
pub mod window;

pub use aggregator::MetricAggregator;
pub use window::{EntityRecord, MetricsError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AggregatedMetrics;

/// Event published after a background recomputation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub entity_id: String,
    pub metrics: AggregatedMetrics,
    pub timestamp: DateTime<Utc>,
}
