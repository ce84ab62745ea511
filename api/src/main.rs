use std::net::SocketAddr;
use std::sync::Arc;

use gatekeep_core::rules::{default_rules, load_rules_file};
use gatekeep_core::sinks::{TracingAuditSink, TracingNotifier};
use gatekeep_core::{AuditSink, EngineConfig, EngineDeps, Gatekeeper, Notifier};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod middleware;
mod routes;
mod sinks;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gatekeep API",
        version = "0.1.0",
        description = "Adaptive admission control and behavioral threat detection."
    ),
    paths(
        routes::health::health_check,
        routes::admission::check_admission,
        routes::admission::subject_stats,
        routes::admission::reset_subject,
        routes::admission::list_actions,
        routes::admission::configure_action,
        routes::security::evaluate_request,
        routes::security::list_alerts,
        routes::security::critical_alerts,
        routes::security::get_alert,
        routes::security::resolve_alert,
        routes::security::list_rules,
        routes::security::subject_status,
        routes::security::block_subject,
        routes::security::unblock_subject,
        routes::metrics::get_metrics,
    ),
    components(schemas(
        HealthResponse,
        gatekeep_core::error::ApiError,
        gatekeep_core::AdmissionDecision,
        gatekeep_core::admission::AdmissionAlgorithm,
        gatekeep_core::BehaviorSnapshot,
        gatekeep_core::admission::Behavior,
        gatekeep_core::SecurityRequest,
        gatekeep_core::Evaluation,
        gatekeep_core::detector::RuleMatch,
        gatekeep_core::Alert,
        gatekeep_core::Severity,
        gatekeep_core::BlockRecord,
        gatekeep_core::ThrottleRecord,
        gatekeep_core::AggregateMetrics,
        gatekeep_core::rules::RuleSummary,
        gatekeep_core::rules::RuleAction,
        gatekeep_core::rules::MatcherSpec,
        gatekeep_core::rules::Predicate,
        routes::admission::AdmissionCheckRequest,
        routes::admission::ActionConfigView,
        routes::admission::ConfigureActionRequest,
        routes::admission::ResetSubjectResponse,
        routes::security::ResolveAlertResponse,
        routes::security::SubjectStatusResponse,
        routes::security::BlockSubjectRequest,
        routes::security::UnblockSubjectResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// "ok", "unreachable" or "disabled"
    pub audit_store: String,
    pub rules: usize,
    pub tracked_quota_keys: usize,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gatekeep_api=debug,gatekeep_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = EngineConfig::from_env().expect("invalid GATEKEEP_* configuration");

    let rules = match std::env::var("GATEKEEP_RULES_PATH") {
        Ok(path) => load_rules_file(&path).expect("failed to load GATEKEEP_RULES_PATH"),
        Err(_) => default_rules(),
    };

    // Audit persistence is optional; without DATABASE_URL events go to the log
    let db = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .expect("Failed to connect to database");
            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");
            Some(pool)
        }
        Err(_) => None,
    };
    let audit: Arc<dyn AuditSink> = match &db {
        Some(pool) => Arc::new(sinks::PgAuditSink::spawn(
            pool.clone(),
            sinks::AUDIT_QUEUE_CAPACITY,
        )),
        None => Arc::new(TracingAuditSink),
    };
    let notifier: Arc<dyn Notifier> = match std::env::var("GATEKEEP_ALERT_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => Arc::new(sinks::WebhookNotifier::new(url)),
        _ => Arc::new(TracingNotifier),
    };

    let deps = EngineDeps::default()
        .audit(audit)
        .notifier(notifier)
        .rules(rules);
    let engine = Arc::new(
        Gatekeeper::new(config, deps)
            .await
            .expect("failed to initialize gatekeeper"),
    );
    let maintenance = engine.start_maintenance();

    let admin = state::AdminAccess::from_env();
    if admin == state::AdminAccess::Open {
        tracing::warn!("GATEKEEP_ADMIN_TOKEN is not set; admin routes are unauthenticated");
    }

    let app_state = state::AppState { engine, admin, db };

    let app = routes::router(app_state, true)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Gatekeep API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .unwrap();

    maintenance.shutdown();
}
