use axum::Router;

use crate::middleware::{access_log::AccessLogLayer, admin::require_admin, rate_limit};
use crate::state::AppState;

pub mod admission;
pub mod health;
pub mod metrics;
pub mod security;

/// Assemble every route. Per-IP limits need the peer address from
/// `into_make_service_with_connect_info`, so they are opt-in.
pub fn router(state: AppState, rate_limited: bool) -> Router {
    let decisions = Router::new()
        .merge(admission::decision_router())
        .merge(security::decision_router());
    let reads = Router::new()
        .merge(admission::read_router())
        .merge(security::read_router())
        .merge(metrics::router());
    let admin = Router::new()
        .merge(admission::admin_router())
        .merge(security::admin_router())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    let (decisions, reads, admin) = if rate_limited {
        (
            decisions.layer(rate_limit::decision_layer()),
            reads.layer(rate_limit::management_layer()),
            admin.layer(rate_limit::management_layer()),
        )
    } else {
        (decisions, reads, admin)
    };

    Router::new()
        .merge(health::router())
        .merge(decisions)
        .merge(reads)
        .merge(admin)
        .layer(AccessLogLayer::new(state.engine.metrics().clone()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use gatekeep_core::metrics::FixedMemoryProbe;
    use gatekeep_core::{EngineConfig, EngineDeps, Gatekeeper};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::router;
    use crate::state::{AdminAccess, AppState};

    async fn app(admin: AdminAccess) -> axum::Router {
        let deps = EngineDeps::default().memory(Arc::new(FixedMemoryProbe(None)));
        let engine = Gatekeeper::new(EngineConfig::default(), deps)
            .await
            .expect("engine should build");
        router(
            AppState {
                engine: Arc::new(engine),
                admin,
                db: None,
            },
            false,
        )
    }

    async fn send(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request should build");

        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_engine_without_database() {
        let app = app(AdminAccess::Open).await;
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["audit_store"], "disabled");
        assert_eq!(body["rules"], 8);
    }

    #[tokio::test]
    async fn sql_injection_blocks_subject() {
        let app = app(AdminAccess::Open).await;
        let (status, body) = send(
            &app,
            "POST",
            "/v1/security/evaluate",
            Some(json!({
                "subject_id": "mallory",
                "content": "' OR 1=1; DROP TABLE users;--"
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["admitted"], false);

        let (_, critical) = send(&app, "GET", "/v1/security/alerts/critical", None, None).await;
        assert_eq!(critical.as_array().map(Vec::len), Some(1));
        assert_eq!(critical[0]["severity"], "critical");

        let (_, subject) = send(&app, "GET", "/v1/security/subjects/mallory", None, None).await;
        assert_eq!(subject["blocked"], true);
        assert_eq!(subject["block"]["reason"], "sql_injection");

        let (_, metrics) = send(&app, "GET", "/v1/metrics", None, None).await;
        assert_eq!(metrics["blocked_requests"], 1);
    }

    #[tokio::test]
    async fn unconfigured_action_uses_fixed_window() {
        let app = app(AdminAccess::Open).await;
        let check = json!({ "subject_id": "u1", "action": "avatar_upload", "account_age_days": 90 });
        for _ in 0..10 {
            let (_, body) = send(&app, "POST", "/v1/admission/check", Some(check.clone()), None).await;
            assert_eq!(body["allowed"], true);
            assert_eq!(body["algorithm"], "fixed_window");
        }
        let (status, body) = send(&app, "POST", "/v1/admission/check", Some(check), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], false);
        assert!(body["retry_after_ms"].as_i64().unwrap_or(0) > 0);
    }

    #[tokio::test]
    async fn admission_stats_follow_checks() {
        let app = app(AdminAccess::Open).await;
        let (status, _) = send(&app, "GET", "/v1/admission/subjects/u2/actions/login", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let check = json!({ "subject_id": "u2", "action": "login", "account_age_days": 0.5 });
        send(&app, "POST", "/v1/admission/check", Some(check), None).await;
        let (status, stats) =
            send(&app, "GET", "/v1/admission/subjects/u2/actions/login", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["adapted_limit"], 1);
        assert_eq!(stats["requests_in_window"], 1);
    }

    #[tokio::test]
    async fn admin_routes_require_token_when_configured() {
        let app = app(AdminAccess::Token("s3cret".to_string())).await;
        let block = json!({ "reason": "manual review", "duration_secs": 120 });

        let (status, body) = send(
            &app,
            "POST",
            "/v1/security/subjects/u3/block",
            Some(block.clone()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, body) = send(
            &app,
            "POST",
            "/v1/security/subjects/u3/block",
            Some(block),
            Some("s3cret"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duration_ms"], 120_000);

        let (status, body) = send(
            &app,
            "DELETE",
            "/v1/security/subjects/u3/block",
            None,
            Some("s3cret"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], true);
    }

    #[tokio::test]
    async fn invalid_action_config_is_a_validation_error() {
        let app = app(AdminAccess::Open).await;
        let (status, body) = send(
            &app,
            "PUT",
            "/v1/admission/actions/login",
            Some(json!({ "base_limit": 0, "time_window_secs": 60 })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "login.base_limit");

        let (status, body) = send(
            &app,
            "PUT",
            "/v1/admission/actions/login",
            Some(json!({ "base_limit": 3, "time_window_secs": 60 })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["base_limit"], 3);
    }

    #[tokio::test]
    async fn unknown_alert_is_not_found() {
        let app = app(AdminAccess::Open).await;
        let id = uuid::Uuid::now_v7();
        let (status, body) = send(&app, "GET", &format!("/v1/security/alerts/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/v1/security/alerts/{id}/resolve"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
