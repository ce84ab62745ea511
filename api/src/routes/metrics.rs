use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use gatekeep_core::AggregateMetrics;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/metrics", get(get_metrics))
}

/// Aggregate request, block and latency counters
#[utoipa::path(
    get,
    path = "/v1/metrics",
    responses((status = 200, description = "Current aggregates", body = AggregateMetrics)),
    tag = "system"
)]
pub async fn get_metrics(State(state): State<AppState>) -> Json<AggregateMetrics> {
    let metrics = state.engine.metrics();
    metrics.recompute_average().await;
    Json(metrics.snapshot().await)
}
