use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;
use gatekeep_core::config::{ActionConfig, MAX_TIME_WINDOW_SECS};
use gatekeep_core::{AdmissionDecision, BehaviorSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

pub fn decision_router() -> Router<AppState> {
    Router::new().route("/v1/admission/check", post(check_admission))
}

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/admission/actions", get(list_actions))
        .route(
            "/v1/admission/subjects/{subject_id}/actions/{action}",
            get(subject_stats),
        )
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/v1/admission/actions/{action}", put(configure_action))
        .route(
            "/v1/admission/subjects/{subject_id}/reset",
            post(reset_subject),
        )
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdmissionCheckRequest {
    pub subject_id: String,
    pub action: String,
    #[serde(default)]
    pub account_age_days: f64,
    /// Outcome of the subject's previous attempt at this action
    #[serde(default = "default_success")]
    pub was_success: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActionConfigView {
    pub action: String,
    pub base_limit: u32,
    pub time_window_secs: i64,
    #[serde(default)]
    pub burst_allowance: u32,
    #[serde(default = "default_adaptive_factor")]
    pub adaptive_factor: f64,
}

fn default_adaptive_factor() -> f64 {
    1.0
}

impl ActionConfigView {
    fn from_config(action: &str, config: &ActionConfig) -> Self {
        Self {
            action: action.to_string(),
            base_limit: config.base_limit,
            time_window_secs: config.time_window.num_seconds(),
            burst_allowance: config.burst_allowance,
            adaptive_factor: config.adaptive_factor,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfigureActionRequest {
    pub base_limit: u32,
    pub time_window_secs: i64,
    #[serde(default)]
    pub burst_allowance: u32,
    #[serde(default = "default_adaptive_factor")]
    pub adaptive_factor: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResetSubjectResponse {
    pub subject_id: String,
    pub removed_records: usize,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(field, format!("{field} must not be empty"), json!(value)));
    }
    Ok(())
}

/// Ask whether a subject may perform an action now
#[utoipa::path(
    post,
    path = "/v1/admission/check",
    request_body = AdmissionCheckRequest,
    responses(
        (status = 200, description = "Decision; denial is reported in the body", body = AdmissionDecision),
        (status = 400, description = "Invalid request", body = gatekeep_core::error::ApiError)
    ),
    tag = "admission"
)]
pub async fn check_admission(
    State(state): State<AppState>,
    Json(req): Json<AdmissionCheckRequest>,
) -> Result<Json<AdmissionDecision>, AppError> {
    require_non_empty("subject_id", &req.subject_id)?;
    require_non_empty("action", &req.action)?;
    if !req.account_age_days.is_finite() || req.account_age_days < 0.0 {
        return Err(AppError::validation(
            "account_age_days",
            "account_age_days must be a non-negative number",
            json!(req.account_age_days),
        ));
    }

    let decision = state
        .engine
        .admission()
        .check(&req.subject_id, &req.action, req.account_age_days, req.was_success)
        .await;
    Ok(Json(decision))
}

/// Behavior snapshot for one subject and action
#[utoipa::path(
    get,
    path = "/v1/admission/subjects/{subject_id}/actions/{action}",
    params(
        ("subject_id" = String, Path, description = "Subject identifier"),
        ("action" = String, Path, description = "Action kind")
    ),
    responses(
        (status = 200, description = "Current quota state", body = BehaviorSnapshot),
        (status = 404, description = "No quota record", body = gatekeep_core::error::ApiError)
    ),
    tag = "admission"
)]
pub async fn subject_stats(
    State(state): State<AppState>,
    Path((subject_id, action)): Path<(String, String)>,
) -> Result<Json<BehaviorSnapshot>, AppError> {
    state
        .engine
        .admission()
        .stats(&subject_id, &action)
        .await
        .map(Json)
        .ok_or(AppError::NotFound {
            resource: "quota record",
            id: format!("{subject_id}/{action}"),
        })
}

/// Drop every quota record of a subject
#[utoipa::path(
    post,
    path = "/v1/admission/subjects/{subject_id}/reset",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    responses(
        (status = 200, description = "Records removed", body = ResetSubjectResponse),
        (status = 401, description = "Admin token required", body = gatekeep_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admission"
)]
pub async fn reset_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Json<ResetSubjectResponse> {
    let removed_records = state.engine.admission().reset_subject(&subject_id).await;
    Json(ResetSubjectResponse {
        subject_id,
        removed_records,
    })
}

/// Configured action kinds
#[utoipa::path(
    get,
    path = "/v1/admission/actions",
    responses((status = 200, description = "Configured actions", body = Vec<ActionConfigView>)),
    tag = "admission"
)]
pub async fn list_actions(State(state): State<AppState>) -> Json<Vec<ActionConfigView>> {
    let actions = state.engine.admission().actions().await;
    Json(
        actions
            .iter()
            .map(|(name, config)| ActionConfigView::from_config(name, config))
            .collect(),
    )
}

/// Register or replace the quota parameters of an action kind
#[utoipa::path(
    put,
    path = "/v1/admission/actions/{action}",
    params(("action" = String, Path, description = "Action kind")),
    request_body = ConfigureActionRequest,
    responses(
        (status = 200, description = "Action configured", body = ActionConfigView),
        (status = 400, description = "Invalid parameters", body = gatekeep_core::error::ApiError),
        (status = 401, description = "Admin token required", body = gatekeep_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admission"
)]
pub async fn configure_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Json(req): Json<ConfigureActionRequest>,
) -> Result<Json<ActionConfigView>, AppError> {
    require_non_empty("action", &action)?;
    if !(1..=MAX_TIME_WINDOW_SECS).contains(&req.time_window_secs) {
        return Err(AppError::validation(
            "time_window_secs",
            format!("time_window_secs must be between 1 and {MAX_TIME_WINDOW_SECS}"),
            json!(req.time_window_secs),
        ));
    }
    let config = ActionConfig::new(req.base_limit, ChronoDuration::seconds(req.time_window_secs))
        .with_burst(req.burst_allowance, req.adaptive_factor);
    state.engine.admission().configure(&action, config.clone()).await?;
    tracing::info!(action = %action, base_limit = req.base_limit, "action reconfigured");
    Ok(Json(ActionConfigView::from_config(&action, &config)))
}
