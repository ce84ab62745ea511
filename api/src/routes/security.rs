use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;
use gatekeep_core::config::MAX_MITIGATION_SECS;
use gatekeep_core::rules::RuleSummary;
use gatekeep_core::{Alert, BlockRecord, Evaluation, SecurityRequest, ThrottleRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_ALERT_LIMIT: usize = 50;

pub fn decision_router() -> Router<AppState> {
    Router::new().route("/v1/security/evaluate", post(evaluate_request))
}

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/security/alerts", get(list_alerts))
        .route("/v1/security/alerts/critical", get(critical_alerts))
        .route("/v1/security/alerts/{alert_id}", get(get_alert))
        .route("/v1/security/rules", get(list_rules))
        .route("/v1/security/subjects/{subject_id}", get(subject_status))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/v1/security/alerts/{alert_id}/resolve", post(resolve_alert))
        .route(
            "/v1/security/subjects/{subject_id}/block",
            post(block_subject).delete(unblock_subject),
        )
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct AlertListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ResolveAlertResponse {
    pub id: Uuid,
    pub resolved: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubjectStatusResponse {
    pub subject_id: String,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockRecord>,
    pub throttled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleRecord>,
    /// A block on this subject expired recently
    pub recovering: bool,
    pub rate_limit_violations: u32,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BlockSubjectRequest {
    pub reason: String,
    /// Defaults to the engine's block TTL
    #[serde(default)]
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UnblockSubjectResponse {
    pub subject_id: String,
    pub removed: bool,
}

/// Run a request through the threat rules
#[utoipa::path(
    post,
    path = "/v1/security/evaluate",
    request_body = SecurityRequest,
    responses(
        (status = 200, description = "Evaluation; callers must stop when admitted is false", body = Evaluation),
        (status = 400, description = "Invalid request", body = gatekeep_core::error::ApiError)
    ),
    tag = "security"
)]
pub async fn evaluate_request(
    State(state): State<AppState>,
    Json(req): Json<SecurityRequest>,
) -> Result<Json<Evaluation>, AppError> {
    if req.subject_id.trim().is_empty() {
        return Err(AppError::validation(
            "subject_id",
            "subject_id must not be empty",
            json!(req.subject_id),
        ));
    }
    Ok(Json(state.engine.detector().evaluate(&req).await))
}

/// Most recent alerts first
#[utoipa::path(
    get,
    path = "/v1/security/alerts",
    params(AlertListQuery),
    responses((status = 200, description = "Alerts", body = Vec<Alert>)),
    tag = "security"
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertListQuery>,
) -> Json<Vec<Alert>> {
    let cap = state.engine.config().alerts.hard_cap;
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT).clamp(1, cap);
    Json(state.engine.alerts().list(limit).await)
}

/// Unresolved critical alerts
#[utoipa::path(
    get,
    path = "/v1/security/alerts/critical",
    responses((status = 200, description = "Unresolved critical alerts", body = Vec<Alert>)),
    tag = "security"
)]
pub async fn critical_alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    Json(state.engine.alerts().critical_unresolved().await)
}

#[utoipa::path(
    get,
    path = "/v1/security/alerts/{alert_id}",
    params(("alert_id" = Uuid, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert", body = Alert),
        (status = 404, description = "Unknown alert", body = gatekeep_core::error::ApiError)
    ),
    tag = "security"
)]
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, AppError> {
    state
        .engine
        .alerts()
        .get(alert_id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound {
            resource: "alert",
            id: alert_id.to_string(),
        })
}

#[utoipa::path(
    post,
    path = "/v1/security/alerts/{alert_id}/resolve",
    params(("alert_id" = Uuid, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert resolved", body = ResolveAlertResponse),
        (status = 401, description = "Admin token required", body = gatekeep_core::error::ApiError),
        (status = 404, description = "Unknown alert", body = gatekeep_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "security"
)]
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<ResolveAlertResponse>, AppError> {
    if !state.engine.alerts().resolve(alert_id).await {
        return Err(AppError::NotFound {
            resource: "alert",
            id: alert_id.to_string(),
        });
    }
    tracing::info!(alert_id = %alert_id, "alert resolved");
    Ok(Json(ResolveAlertResponse {
        id: alert_id,
        resolved: true,
    }))
}

/// Active rule set
#[utoipa::path(
    get,
    path = "/v1/security/rules",
    responses((status = 200, description = "Rules in evaluation order", body = Vec<RuleSummary>)),
    tag = "security"
)]
pub async fn list_rules(State(state): State<AppState>) -> Json<Vec<RuleSummary>> {
    Json(
        state
            .engine
            .detector()
            .rules()
            .iter()
            .map(|rule| rule.summary())
            .collect(),
    )
}

/// Block, throttle and recovery state of a subject
#[utoipa::path(
    get,
    path = "/v1/security/subjects/{subject_id}",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    responses((status = 200, description = "Mitigation state", body = SubjectStatusResponse)),
    tag = "security"
)]
pub async fn subject_status(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Json<SubjectStatusResponse> {
    let enforcer = state.engine.enforcer();
    let block = enforcer.block_record(&subject_id);
    let blocked = block.is_some() || enforcer.is_blocked(&subject_id);
    let throttle = enforcer.throttle_record(&subject_id);
    Json(SubjectStatusResponse {
        blocked,
        block,
        throttled: throttle.is_some(),
        throttle,
        recovering: enforcer.is_recovering(&subject_id),
        rate_limit_violations: state.engine.admission().violations_for(&subject_id).await,
        subject_id,
    })
}

#[utoipa::path(
    post,
    path = "/v1/security/subjects/{subject_id}/block",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    request_body = BlockSubjectRequest,
    responses(
        (status = 200, description = "Subject blocked", body = BlockRecord),
        (status = 400, description = "Invalid duration", body = gatekeep_core::error::ApiError),
        (status = 401, description = "Admin token required", body = gatekeep_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "security"
)]
pub async fn block_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Json(req): Json<BlockSubjectRequest>,
) -> Result<Json<BlockRecord>, AppError> {
    let ttl = match req.duration_secs {
        Some(secs) if (1..=MAX_MITIGATION_SECS).contains(&secs) => ChronoDuration::seconds(secs),
        Some(secs) => {
            return Err(AppError::validation(
                "duration_secs",
                format!("duration_secs must be between 1 and {MAX_MITIGATION_SECS}"),
                json!(secs),
            ));
        }
        None => state.engine.config().block_ttl,
    };
    let reason = if req.reason.trim().is_empty() {
        "manual"
    } else {
        req.reason.trim()
    };
    Ok(Json(state.engine.enforcer().block(&subject_id, reason, ttl)))
}

#[utoipa::path(
    delete,
    path = "/v1/security/subjects/{subject_id}/block",
    params(("subject_id" = String, Path, description = "Subject identifier")),
    responses(
        (status = 200, description = "Block removed if present", body = UnblockSubjectResponse),
        (status = 401, description = "Admin token required", body = gatekeep_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "security"
)]
pub async fn unblock_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Json<UnblockSubjectResponse> {
    let removed = state.engine.enforcer().unblock(&subject_id);
    Json(UnblockSubjectResponse {
        subject_id,
        removed,
    })
}
