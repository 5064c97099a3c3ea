//! Shared API request/response types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::AggregatedMetrics;

/// Response of `GET /api/v1/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,

    /// Live WebSocket connections
    pub connections: usize,

    /// Models with recorded samples
    pub entities: usize,
}

/// Response of `GET /api/v1/metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllMetricsResponse {
    pub metrics: HashMap<String, AggregatedMetrics>,
}

/// Response of `GET /api/v1/metrics/:entity_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub entity_id: String,
    pub metrics: AggregatedMetrics,
}

/// Body of `POST /api/v1/metrics/:entity_id/samples`
///
/// Reported by the request-forwarding layer after every completed
/// generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSampleRequest {
    /// Wall time of the call in milliseconds
    pub latency_ms: u64,

    /// Generated units (tokens)
    pub unit_count: i64,
}
