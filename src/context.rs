//! Per-request parsed input.
//!
//! The body parser creates one [`RequestContext`] per request and stores it
//! in the request extensions. Later stages (pollution guard, validation)
//! rewrite it in place; handlers extract it with axum's extractor machinery
//! and deserialize the already-validated parts into typed structs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::validation::FieldViolation;

/// Part of the request a schema applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Body,
    Query,
    Params,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Body => "body",
            Target::Query => "query",
            Target::Params => "params",
        }
    }
}

/// How the body was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    /// No body, or an empty one
    #[default]
    Empty,
    Json,
    Form,
    /// Some other content type; left as raw bytes for the handler
    Other,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body_kind: BodyKind,
    /// Decoded body; `Null` when absent or not JSON/form
    pub body: Value,
    /// Query string as a JSON object
    pub query: Value,
    /// Path parameters as a JSON object, filled in by validation
    pub params: Value,
    /// Violations accumulated by validation stages
    pub violations: Vec<FieldViolation>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            body_kind: BodyKind::Empty,
            body: Value::Null,
            query: Value::Object(Map::new()),
            params: Value::Object(Map::new()),
            violations: Vec::new(),
        }
    }

    pub fn target(&self, target: Target) -> &Value {
        match target {
            Target::Body => &self.body,
            Target::Query => &self.query,
            Target::Params => &self.params,
        }
    }

    pub fn set_target(&mut self, target: Target, value: Value) {
        match target {
            Target::Body => self.body = value,
            Target::Query => self.query = value,
            Target::Params => self.params = value,
        }
    }

    pub fn body_as<T: DeserializeOwned>(&self) -> AppResult<T> {
        Ok(T::deserialize(&self.body)?)
    }

    pub fn query_as<T: DeserializeOwned>(&self) -> AppResult<T> {
        Ok(T::deserialize(&self.query)?)
    }

    pub fn params_as<T: DeserializeOwned>(&self) -> AppResult<T> {
        Ok(T::deserialize(&self.params)?)
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal("request context missing".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Page {
        page: i64,
        limit: i64,
    }

    #[test]
    fn test_typed_access() {
        let mut ctx = RequestContext::new(Method::GET, "/api/users", HeaderMap::new());
        ctx.set_target(Target::Query, json!({"page": 2, "limit": 10}));

        let page: Page = ctx.query_as().unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.limit, 10);
    }

    #[test]
    fn test_type_mismatch_is_bad_request() {
        let mut ctx = RequestContext::new(Method::GET, "/api/users", HeaderMap::new());
        ctx.set_target(Target::Query, json!({"page": "two", "limit": 10}));

        let err = ctx.query_as::<Page>().unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_extractor_requires_context() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let err = RequestContext::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        parts.extensions.insert(RequestContext::new(
            Method::GET,
            "/",
            HeaderMap::new(),
        ));
        assert!(
            RequestContext::from_request_parts(&mut parts, &())
                .await
                .is_ok()
        );
    }
}
