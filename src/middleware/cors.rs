//! Whitelist-based CORS enforcement.
//!
//! Two layers cooperate:
//!
//! ```text
//!   Request ──► OriginGuardLayer ──► CorsLayer (tower-http) ──► inner
//!                  │                     │
//!                  │ origin not listed   │ OPTIONS preflight: answered here
//!                  ▼                     ▼ otherwise: echoes Allow-Origin
//!               403 ForbiddenOrigin
//! ```
//!
//! Requests without an `Origin` header (same-origin, curl, server-to-server)
//! always pass. Allowed origins are echoed back, never a wildcard.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use super::rate_limit::{RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};
use crate::config::Config;
use crate::error::AppError;

/// Parsed origin whitelist, immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct OriginWhitelist {
    origins: Arc<Vec<HeaderValue>>,
}

impl OriginWhitelist {
    /// Parse origins. Entries that are not valid header values are skipped.
    pub fn new(origins: &[String]) -> Self {
        let origins = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Invalid origin in CORS_ORIGIN, skipping");
                    None
                }
            })
            .collect();
        Self {
            origins: Arc::new(origins),
        }
    }

    pub fn allows(&self, origin: &HeaderValue) -> bool {
        self.origins.iter().any(|allowed| allowed == origin)
    }

    pub fn origins(&self) -> &[HeaderValue] {
        &self.origins
    }
}

/// Build the tower-http CORS layer for allowed origins.
///
/// Credentials, preflight cache lifetime and origins come from configuration;
/// methods, request headers and exposed headers are fixed.
pub fn build_cors_layer(config: &Config) -> CorsLayer {
    let whitelist = OriginWhitelist::new(&config.cors_origins);

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(whitelist.origins().iter().cloned()))
        .allow_credentials(config.cors_credentials)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
            header::ACCEPT,
            header::ORIGIN,
        ])
        .expose_headers([
            HeaderName::from_static(RATELIMIT_LIMIT),
            HeaderName::from_static(RATELIMIT_REMAINING),
            HeaderName::from_static(RATELIMIT_RESET),
        ])
        .max_age(config.cors_max_age)
}

/// Rejects requests whose `Origin` is not whitelisted.
#[derive(Clone, Debug)]
pub struct OriginGuardLayer {
    whitelist: OriginWhitelist,
}

impl OriginGuardLayer {
    pub fn new(whitelist: OriginWhitelist) -> Self {
        Self { whitelist }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(OriginWhitelist::new(&config.cors_origins))
    }
}

impl<S> Layer<S> for OriginGuardLayer {
    type Service = OriginGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OriginGuardService {
            inner,
            whitelist: self.whitelist.clone(),
        }
    }
}

#[derive(Clone)]
pub struct OriginGuardService<S> {
    inner: S,
    whitelist: OriginWhitelist,
}

impl<S> Service<Request<Body>> for OriginGuardService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if let Some(origin) = req.headers().get(header::ORIGIN)
            && !self.whitelist.allows(origin)
        {
            let origin = String::from_utf8_lossy(origin.as_bytes()).into_owned();
            return Box::pin(async move { Ok(AppError::ForbiddenOrigin(origin).into_response()) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use std::time::Duration;
    use tower::ServiceExt;
    use tower::util::BoxCloneService;

    fn stack(config: &Config) -> BoxCloneService<Request<Body>, Response<Body>, Infallible> {
        let inner = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(Response::new(Body::from("ok")))
        });
        let svc = tower::ServiceBuilder::new()
            .layer(OriginGuardLayer::from_config(config))
            .layer(build_cors_layer(config))
            .service(inner);
        BoxCloneService::new(svc)
    }

    fn request(method: Method, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/api/users");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_no_origin_passes() {
        let res = stack(&Config::default())
            .oneshot(request(Method::GET, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_whitelisted_origin_echoed() {
        let res = stack(&Config::default())
            .oneshot(request(Method::GET, Some("http://localhost:3000")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        let exposed = res.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
            .to_str()
            .unwrap();
        assert!(exposed.contains("ratelimit-remaining"));
    }

    #[tokio::test]
    async fn test_foreign_origin_forbidden() {
        let res = stack(&Config::default())
            .oneshot(request(Method::GET, Some("http://evil.example")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(!res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_preflight_is_cached() {
        let config = Config {
            cors_max_age: Duration::from_secs(86_400),
            ..Config::default()
        };
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/users")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let res = stack(&config).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ACCESS_CONTROL_MAX_AGE], "86400");
        let methods = res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap();
        for method in ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"] {
            assert!(methods.contains(method), "missing {method}");
        }
        let allowed = res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap();
        assert!(allowed.contains("x-requested-with"));
    }

    #[test]
    fn test_whitelist_matching_is_exact() {
        let whitelist = OriginWhitelist::new(&["https://app.example.com".to_string()]);
        assert!(whitelist.allows(&HeaderValue::from_static("https://app.example.com")));
        assert!(!whitelist.allows(&HeaderValue::from_static("https://app.example.com.evil")));
        assert!(!whitelist.allows(&HeaderValue::from_static("http://app.example.com")));
    }
}
