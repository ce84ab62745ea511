use serde::Serialize;
use utoipa::ToSchema;

/// Errors raised while configuring or loading the engine.
///
/// Admission denials and blocked evaluations are ordinary results and never
/// surface through this type.
#[derive(Debug, thiserror::Error)]
pub enum GatekeepError {
    #[error("invalid configuration for '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    #[error("rule '{rule_id}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("duplicate rule id '{0}'")]
    DuplicateRule(String),

    #[error("failed to read rules file '{path}': {source}")]
    RulesIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rules file '{path}': {source}")]
    RulesParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl GatekeepError {
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        GatekeepError::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Structured error response body.
/// Carries enough context for a caller to understand what went wrong and how
/// to correct the request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const RATE_LIMITED: &str = "rate_limited";
}

#[cfg(test)]
mod tests {
    use super::GatekeepError;

    #[test]
    fn invalid_config_message_names_field() {
        let err = GatekeepError::invalid_config("base_limit", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'base_limit': must be at least 1"
        );
    }

    #[test]
    fn invalid_pattern_keeps_regex_source() {
        let source = regex::Regex::new("(unclosed").expect_err("pattern should fail");
        let err = GatekeepError::InvalidPattern {
            rule_id: "broken".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("rule 'broken' has an invalid pattern"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
