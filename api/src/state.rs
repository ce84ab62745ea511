use std::sync::Arc;

use gatekeep_core::Gatekeeper;
use sqlx::PgPool;

/// Guard for mutating admin routes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminAccess {
    /// No `GATEKEEP_ADMIN_TOKEN` configured; admin routes are open.
    Open,
    Token(String),
}

impl AdminAccess {
    pub fn from_env() -> Self {
        match std::env::var("GATEKEEP_ADMIN_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Self::Token(token.trim().to_string()),
            _ => Self::Open,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Gatekeeper>,
    pub admin: AdminAccess,
    /// Present when the Postgres audit sink is enabled
    pub db: Option<PgPool>,
}
