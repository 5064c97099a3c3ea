//! API shared state

use crate::{channel::Hub, metrics::MetricAggregator};

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Broadcast hub owning the WebSocket connections
    pub hub: Hub,

    /// Metric store for pull queries and sample ingestion
    pub metrics: MetricAggregator,
}

impl ApiState {
    pub fn new(hub: Hub) -> Self {
        let metrics = hub.metrics().clone();
        Self { hub, metrics }
    }
}
