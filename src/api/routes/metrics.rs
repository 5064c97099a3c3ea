//! Model performance endpoints

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AllMetricsResponse, MetricsResponse, RecordSampleRequest},
};

/// GET /api/v1/metrics
///
/// Summaries for every model that has recorded samples
pub async fn get_all_metrics(State(state): State<ApiState>) -> Json<AllMetricsResponse> {
    Json(AllMetricsResponse {
        metrics: state.metrics.get_all_metrics(),
    })
}

/// GET /api/v1/metrics/:entity_id
pub async fn get_metrics(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
) -> ApiResult<Json<MetricsResponse>> {
    let metrics = state
        .metrics
        .get_metrics(&entity_id)
        .ok_or_else(|| ApiError::NotFound(format!("no samples recorded for {entity_id}")))?;

    Ok(Json(MetricsResponse { entity_id, metrics }))
}

/// POST /api/v1/metrics/:entity_id/samples
///
/// Records one completed generation call. Values are stored as given.
pub async fn record_sample(
    State(state): State<ApiState>,
    Path(entity_id): Path<String>,
    Json(request): Json<RecordSampleRequest>,
) -> ApiResult<StatusCode> {
    if entity_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("entity id must not be empty".into()));
    }

    state.metrics.record_sample(
        &entity_id,
        Duration::from_millis(request.latency_ms),
        request.unit_count,
    );

    Ok(StatusCode::ACCEPTED)
}
