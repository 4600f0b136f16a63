//! Centralized failure rendering.
//!
//! Every stage reports a failure by returning `AppError::into_response()`,
//! which tags the response with a [`Failure`] extension. This stage sits
//! outermost, finds the tag, and replaces the body with the final envelope:
//!
//! | Field              | Production                    | Development             |
//! |--------------------|-------------------------------|-------------------------|
//! | `message`          | generic client/server text    | full error message      |
//! | `referenceId`      | always                        | always                  |
//! | `name`, `stack`    | omitted                       | error kind, cause chain |
//! | `validationErrors` | field + rule, value redacted  | full detail             |
//!
//! Each failure is logged once with its reference id so support requests can
//! be matched to server logs. Production log messages are scrubbed of
//! filesystem paths and source locations.

use std::sync::LazyLock;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderValue};
use axum::http::{HeaderName, Method};
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use regex::Regex;
use tracing::{error, warn};

use super::security_headers::IDENTIFYING_HEADERS;
use crate::config::{Config, Environment};
use crate::error::{AppError, Failure};
use crate::models::{ErrorBody, ErrorEnvelope, ValidationErrors};

#[allow(clippy::expect_used)]
static STACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bat [\w:<>$.{}]+ \([^)]*\)").expect("stack frame pattern is a valid literal")
});

#[allow(clippy::expect_used)]
static SOURCE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w./\\-]+\.rs:\d+(?::\d+)?").expect("source location pattern is a valid literal")
});

#[allow(clippy::expect_used)]
static FS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z]:\\|/)(?:[\w.-]+[/\\])+[\w.-]*")
        .expect("path pattern is a valid literal")
});

/// Fresh opaque identifier for one failure occurrence.
pub fn reference_id() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}

/// Remove stack frames, source locations and filesystem paths from `message`.
pub fn scrub(message: &str) -> String {
    let message = STACK_FRAME.replace_all(message, "[frame]");
    let message = SOURCE_LOCATION.replace_all(&message, "[location]");
    FS_PATH.replace_all(&message, "[path]").into_owned()
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorFormatter {
    environment: Environment,
}

impl ErrorFormatter {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.environment)
    }

    /// Client-facing envelope for `error`.
    pub fn envelope(&self, error: &AppError, reference_id: String) -> ErrorEnvelope {
        let status_code = error.status().as_u16();

        let body = if self.environment.is_production() {
            ErrorBody {
                message: error.generic_message().to_string(),
                status_code,
                reference_id,
                name: None,
                stack: None,
                validation_errors: error.violations().map(|violations| {
                    ValidationErrors::Redacted(violations.iter().map(|v| v.redacted()).collect())
                }),
            }
        } else {
            ErrorBody {
                message: error.to_string(),
                status_code,
                reference_id,
                name: Some(error.kind()),
                stack: Some(error.cause_chain()),
                validation_errors: error
                    .violations()
                    .map(|violations| ValidationErrors::Full(violations.to_vec())),
            }
        };

        ErrorEnvelope {
            success: false,
            error: body,
        }
    }

    /// Emit the single log event for a failure.
    pub fn log(&self, error: &AppError, reference_id: &str, method: &Method, path: &str) {
        let status = error.status().as_u16();
        let kind = error.kind();

        let (message, cause) = if self.environment.is_production() {
            (scrub(&error.to_string()), None)
        } else {
            (error.to_string(), Some(error.cause_chain().join(": ")))
        };

        macro_rules! emit {
            ($level:ident) => {
                $level!(
                    reference_id,
                    status,
                    method = %method,
                    path,
                    kind,
                    message = %message,
                    cause = cause.as_deref(),
                    "Request failed"
                )
            };
        }

        if error.status().is_server_error() {
            emit!(error);
        } else {
            emit!(warn);
        }
    }

    /// Replace the body of a tagged failure response with the envelope.
    pub fn render(&self, response: Response, method: &Method, path: &str) -> Response {
        let Some(Failure(error)) = response.extensions().get::<Failure>().cloned() else {
            return response;
        };

        let id = reference_id();
        self.log(&error, &id, method, path);
        let envelope = self.envelope(&error, id);

        let (mut parts, _) = response.into_parts();
        let body = match serde_json::to_vec(&envelope) {
            Ok(bytes) => Body::from(bytes),
            Err(e) => {
                error!(error = %e, "Failed to serialize error envelope");
                Body::from(r#"{"success":false}"#)
            }
        };

        parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        parts.headers.remove(header::CONTENT_LENGTH);
        for name in IDENTIFYING_HEADERS {
            parts.headers.remove(HeaderName::from_static(name));
        }

        Response::from_parts(parts, body)
    }
}

/// Middleware entry point for the error formatter.
pub async fn format_errors(
    State(formatter): State<ErrorFormatter>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    formatter.render(response, &method, &path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::validation::{Field, Schema};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};

    fn signup_failure() -> AppError {
        let violations = Schema::new()
            .field(Field::username("username"))
            .field(Field::email("email"))
            .field(Field::password("password"))
            .validate(&json!({
                "username": "ab",
                "email": "not-an-email",
                "password": "weak",
            }))
            .unwrap_err();
        AppError::Validation(violations)
    }

    async fn render(env: Environment, error: AppError) -> (Response, Value) {
        let response = ErrorFormatter::new(env).render(
            error.into_response(),
            &Method::POST,
            "/api/users",
        );
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap();
        (Response::from_parts(parts, Body::empty()), value)
    }

    #[tokio::test]
    async fn test_production_redacts_values() {
        let (res, body) = render(Environment::Production, signup_failure()).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Invalid request");
        assert!(body["error"].get("stack").is_none());
        assert!(body["error"].get("name").is_none());

        let details = body["error"]["validationErrors"].as_array().unwrap();
        assert_eq!(details.len(), 3);
        let raw = body.to_string();
        for submitted in ["not-an-email", "weak"] {
            assert!(!raw.contains(submitted), "leaked {submitted}");
        }
        for detail in details {
            assert_eq!(detail["value"], "[REDACTED]");
        }
    }

    #[tokio::test]
    async fn test_development_shows_full_detail() {
        let (_, body) = render(Environment::Development, signup_failure()).await;
        assert_eq!(body["error"]["name"], "ValidationError");
        assert!(body["error"]["stack"].is_array());

        let details = body["error"]["validationErrors"].as_array().unwrap();
        assert_eq!(details.len(), 3);
        assert_eq!(details[1]["field"], "email");
        assert_eq!(details[1]["value"], "not-an-email");
    }

    #[tokio::test]
    async fn test_server_error_is_generic_in_production() {
        let (res, body) = render(
            Environment::Production,
            AppError::Internal("db at /var/lib/app/data.db unreachable".into()),
        )
        .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "An unexpected error occurred");
        assert_eq!(body["error"]["statusCode"], 500);
        assert!(!body.to_string().contains("/var/lib"));
    }

    #[tokio::test]
    async fn test_replay_gives_same_status_and_shape() {
        let (first_res, first) = render(Environment::Production, signup_failure()).await;
        let (second_res, second) = render(Environment::Production, signup_failure()).await;

        assert_eq!(first_res.status(), second_res.status());
        let keys = |v: &Value| {
            let mut keys: Vec<String> = v["error"].as_object().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        };
        assert_eq!(keys(&first), keys(&second));
        assert_ne!(first["error"]["referenceId"], second["error"]["referenceId"]);
    }

    #[tokio::test]
    async fn test_headers_preserved_and_identity_removed() {
        let mut response = AppError::RateLimitExceeded {
            retry_after_secs: 30,
        }
        .into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("30"));
        response
            .headers_mut()
            .insert("x-powered-by", HeaderValue::from_static("axum"));

        let rendered =
            ErrorFormatter::new(Environment::Production).render(response, &Method::GET, "/");
        assert_eq!(rendered.headers()[header::RETRY_AFTER], "30");
        assert_eq!(rendered.headers()[header::CONTENT_TYPE], "application/json");
        assert!(!rendered.headers().contains_key("x-powered-by"));
    }

    #[test]
    fn test_untagged_response_passes_through() {
        let response = Response::new(Body::from("fine"));
        let rendered =
            ErrorFormatter::new(Environment::Production).render(response, &Method::GET, "/");
        assert_eq!(rendered.status(), StatusCode::OK);
    }

    #[test]
    fn test_scrub_removes_paths_and_frames() {
        let scrubbed = scrub(concat!(
            "open /etc/app/secrets.pem failed at src/config.rs:42:7, ",
            "at load (/srv/app/index.js:10:3)",
        ));
        assert!(!scrubbed.contains("/etc/app"));
        assert!(!scrubbed.contains("config.rs:42"));
        assert!(!scrubbed.contains("/srv/app"));
        assert!(scrubbed.starts_with("open "));
    }

    #[test]
    fn test_reference_ids_are_hex_and_unique() {
        let a = reference_id();
        let b = reference_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
