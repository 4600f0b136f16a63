//! Security response headers.
//!
//! Attaches a fixed header set to every response, including error responses
//! produced by inner layers, and strips framework-identifying headers.
//!
//! | Header                          | Development                 | Production            |
//! |---------------------------------|-----------------------------|-----------------------|
//! | `Content-Security-Policy`       | `script-src` allows inline  | strict, upgrades HTTP |
//! | `Strict-Transport-Security`     | `max-age=N; includeSubDomains; preload` | same      |
//! | `X-Frame-Options`               | `DENY`                      | `DENY`                |
//! | `X-Content-Type-Options`        | `nosniff`                   | `nosniff`             |
//! | `Referrer-Policy`               | `no-referrer`               | `no-referrer`         |
//! | `X-DNS-Prefetch-Control`        | `off`                       | `off`                 |
//! | `Cross-Origin-Opener-Policy`    | `same-origin`               | `same-origin`         |
//! | `Cross-Origin-Resource-Policy`  | `same-origin`               | `same-origin`         |
//! | `Cross-Origin-Embedder-Policy`  | absent                      | `require-corp`        |

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Request, Response};
use tower::{Layer, Service};

use crate::config::{Config, Environment};

const CSP_DEVELOPMENT: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; \
    style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; \
    connect-src 'self'; object-src 'none'; frame-src 'none'; base-uri 'self'; \
    form-action 'self'; frame-ancestors 'none'";

const CSP_PRODUCTION: &str = "default-src 'self'; script-src 'self'; \
    style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; \
    connect-src 'self'; object-src 'none'; frame-src 'none'; base-uri 'self'; \
    form-action 'self'; frame-ancestors 'none'; upgrade-insecure-requests";

const DEFAULT_HSTS: &str = "max-age=31536000; includeSubDomains; preload";

/// Headers that reveal the server implementation.
pub const IDENTIFYING_HEADERS: [&str; 2] = ["server", "x-powered-by"];

/// Security header layer for Tower middleware stack.
#[derive(Clone, Debug)]
pub struct SecurityHeadersLayer {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl SecurityHeadersLayer {
    pub fn new(environment: Environment, hsts_max_age: u64) -> Self {
        let production = environment.is_production();
        let csp = if production {
            CSP_PRODUCTION
        } else {
            CSP_DEVELOPMENT
        };
        let hsts = HeaderValue::try_from(format!(
            "max-age={hsts_max_age}; includeSubDomains; preload"
        ))
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_HSTS));

        let mut headers = vec![
            (
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_static(csp),
            ),
            (header::STRICT_TRANSPORT_SECURITY, hsts),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("no-referrer"),
            ),
            (
                header::X_DNS_PREFETCH_CONTROL,
                HeaderValue::from_static("off"),
            ),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (
                HeaderName::from_static("cross-origin-resource-policy"),
                HeaderValue::from_static("same-origin"),
            ),
        ];

        if production {
            headers.push((
                HeaderName::from_static("cross-origin-embedder-policy"),
                HeaderValue::from_static("require-corp"),
            ));
        }

        Self {
            headers: Arc::new(headers),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.environment, config.hsts_max_age)
    }

    /// Apply the header set to a response in place.
    pub fn apply<B>(&self, response: &mut Response<B>) {
        let target = response.headers_mut();
        for (name, value) in self.headers.iter() {
            target.insert(name.clone(), value.clone());
        }
        for name in IDENTIFYING_HEADERS {
            target.remove(name);
        }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    layer: SecurityHeadersLayer,
}

impl<S> Service<Request<Body>> for SecurityHeadersService<S>
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
        let mut inner = self.inner.clone();
        let layer = self.layer.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            layer.apply(&mut response);
            Ok(response)
        })
    }
}
