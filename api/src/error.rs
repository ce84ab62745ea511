use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gatekeep_core::error::{self, ApiError, GatekeepError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or wrong admin token (401)
    Unauthorized,
    /// Unknown resource (404)
    NotFound { resource: &'static str, id: String },
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>, received: serde_json::Value) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
            received: Some(received),
            docs_hint: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message: "A valid admin token is required for this operation".to_string(),
                    field: Some("authorization".to_string()),
                    received: None,
                    request_id,
                    docs_hint: Some(
                        "Send 'Authorization: Bearer <GATEKEEP_ADMIN_TOKEN>'.".to_string(),
                    ),
                },
            ),
            AppError::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} '{id}' not found"),
                    field: None,
                    received: Some(serde_json::Value::String(id)),
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<GatekeepError> for AppError {
    fn from(err: GatekeepError) -> Self {
        match err {
            GatekeepError::InvalidConfig { field, message } => AppError::Validation {
                message,
                field: Some(field),
                received: None,
                docs_hint: Some(
                    "base_limit must be at least 1 and time_window_secs positive.".to_string(),
                ),
            },
            other => AppError::Internal(other.to_string()),
        }
    }
}
