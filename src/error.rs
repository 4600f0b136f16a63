use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::error::Category;
use serde_json::json;
use thiserror::Error;

use crate::validation::FieldViolation;

/// Application-wide failure taxonomy with appropriate HTTP status codes.
///
/// Every pipeline stage either completes normally or produces exactly one
/// `AppError`. The error travels to the client through [`IntoResponse`],
/// which attaches it to the response so the error formatter can render the
/// final envelope with request context (method, path, environment).
///
/// # Status Classification
///
/// | Variant              | Status |
/// |----------------------|--------|
/// | `Validation`         | 400    |
/// | `MalformedBody`      | 400    |
/// | `BadRequest`         | 400    |
/// | `ForbiddenOrigin`    | 403    |
/// | `PayloadTooLarge`    | 413    |
/// | `RateLimitExceeded`  | 429    |
/// | `ServiceUnavailable` | 503    |
/// | everything else      | 500    |
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {}", summarize_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Origin not allowed by CORS policy: {0}")]
    ForbiddenOrigin(String),

    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Server is shutting down")]
    ServiceUnavailable,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// HTTP status for this failure.
    ///
    /// The mapping is total and depends only on the variant, so replaying
    /// the same failure always yields the same status.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedBody(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::ForbiddenOrigin(_) => StatusCode::FORBIDDEN,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Config(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable error name, exposed to clients in development mode only.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::MalformedBody(_) => "MalformedBody",
            AppError::BadRequest(_) => "BadRequest",
            AppError::ForbiddenOrigin(_) => "ForbiddenOrigin",
            AppError::PayloadTooLarge { .. } => "PayloadTooLarge",
            AppError::RateLimitExceeded { .. } => "RateLimitExceeded",
            AppError::ServiceUnavailable => "ServiceUnavailable",
            AppError::Internal(_) => "InternalError",
            AppError::Config(_) => "ConfigError",
            AppError::Io(_) => "IoError",
        }
    }

    /// Field-level violations when this failure came from schema validation.
    pub fn violations(&self) -> Option<&[FieldViolation]> {
        match self {
            AppError::Validation(violations) => Some(violations),
            _ => None,
        }
    }

    /// Whether the request body failed to parse as its declared content type.
    ///
    /// Kept distinct from validation failures even though both map to 400.
    pub fn is_body_syntax_error(&self) -> bool {
        matches!(self, AppError::MalformedBody(_))
    }

    /// Generic client-facing text that only distinguishes client mistakes
    /// from server faults.
    pub fn generic_message(&self) -> &'static str {
        if self.status().is_client_error() {
            "Invalid request"
        } else {
            "An unexpected error occurred"
        }
    }

    /// The error message followed by each `source()` in its cause chain.
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        chain
    }
}

/// Marker stored in response extensions carrying the failure that produced
/// the response.
#[derive(Debug, Clone)]
pub struct Failure(pub Arc<AppError>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Minimal envelope; the error formatter replaces it with the full
        // environment-aware one.
        let body = json!({
            "success": false,
            "error": {
                "message": self.generic_message(),
                "statusCode": status.as_u16(),
            }
        });

        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(Failure(Arc::new(self)));
        response
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        match e.classify() {
            Category::Syntax | Category::Eof => AppError::MalformedBody(sanitize_serde_error(&e)),
            Category::Data => AppError::BadRequest(sanitize_serde_error(&e)),
            Category::Io => AppError::Internal(e.to_string()),
        }
    }
}

fn summarize_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if e.is_eof() {
        return "Unexpected end of JSON input".to_string();
    }

    if e.is_syntax() {
        return format!("Malformed JSON at line {} column {}", e.line(), e.column());
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::validation::ViolationKind;

    fn violation(field: &str) -> FieldViolation {
        FieldViolation {
            field: field.to_string(),
            message: format!("\"{field}\" is required"),
            kind: ViolationKind::Required,
            value: None,
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            AppError::Validation(vec![violation("email")]).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::MalformedBody("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ForbiddenOrigin("http://evil.example".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::PayloadTooLarge { limit: 10 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::RateLimitExceeded {
                retry_after_secs: 5
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::ServiceUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_json_syntax_error_is_malformed_body() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{\"a\":")
            .unwrap_err()
            .into();
        assert!(err.is_body_syntax_error());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_json_data_error_is_not_syntax_error() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Target {
            count: u32,
        }

        let err: AppError = serde_json::from_str::<Target>("{\"count\":\"x\"}")
            .unwrap_err()
            .into();
        assert!(!err.is_body_syntax_error());
        assert_eq!(err.to_string(), "Invalid request: Invalid data type in request body");
    }

    #[test]
    fn test_into_response_attaches_failure() {
        let response = AppError::ServiceUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let failure = response.extensions().get::<Failure>().unwrap();
        assert_eq!(failure.0.kind(), "ServiceUnavailable");
    }

    #[test]
    fn test_generic_message_distinguishes_client_and_server() {
        assert_eq!(
            AppError::BadRequest("x".into()).generic_message(),
            "Invalid request"
        );
        assert_eq!(
            AppError::Internal("x".into()).generic_message(),
            "An unexpected error occurred"
        );
    }

    #[test]
    fn test_cause_chain_includes_source() {
        let io = std::io::Error::other("disk on fire");
        let err = AppError::Io(io);
        let chain = err.cause_chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[1].contains("disk on fire"));
    }
}
