use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::AppState;

pub async fn live() -> &'static str {
    "ok"
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn ready(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.store.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Serialize)]
pub struct AnalysisStatusResponse {
    id: i64,
    status: String,
    total_gaps: i64,
    valid_gaps: i64,
}

pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<AnalysisStatusResponse>, StatusCode> {
    match state.store.analysis_by_correlation_id(&correlation_id) {
        Ok(Some((id, status, counters))) => Ok(Json(AnalysisStatusResponse {
            id,
            status: status.to_string(),
            total_gaps: counters.total_gaps_identified,
            valid_gaps: counters.valid_gaps_count,
        })),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Resets an analysis back to PENDING. Re-publishing a fresh request to
/// the bus so it actually gets reprocessed is the orchestrator's
/// responsibility — this endpoint only clears the stored terminal state.
pub async fn retry_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> StatusCode {
    match state.store.reset_to_pending(id) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
