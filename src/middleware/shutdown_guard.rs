//! Rejects new work once the drain sequence has begun.
//!
//! The guard reads the shared shutdown flag on every request. While the flag
//! is set, requests get `503 Service Unavailable` with `Connection: close`
//! before any later stage runs. Exempt paths (the health probe) still reach
//! their handler so orchestrators can observe the draining state.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::debug;

use crate::error::AppError;
use crate::lifecycle::ResourceTracker;

/// Paths that bypass the guard by default.
pub const DEFAULT_EXEMPT_PATHS: &[&str] = &["/health"];

#[derive(Clone, Debug)]
pub struct ShutdownGuardLayer {
    tracker: Arc<ResourceTracker>,
    exempt: Arc<Vec<String>>,
}

impl ShutdownGuardLayer {
    pub fn new(tracker: Arc<ResourceTracker>) -> Self {
        Self {
            tracker,
            exempt: Arc::new(DEFAULT_EXEMPT_PATHS.iter().map(|p| p.to_string()).collect()),
        }
    }

    /// Replace the exempt path list (exact match).
    pub fn exempt_paths(mut self, paths: Vec<String>) -> Self {
        self.exempt = Arc::new(paths);
        self
    }
}

impl<S> Layer<S> for ShutdownGuardLayer {
    type Service = ShutdownGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ShutdownGuardService {
            inner,
            tracker: self.tracker.clone(),
            exempt: self.exempt.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownGuardService<S> {
    inner: S,
    tracker: Arc<ResourceTracker>,
    exempt: Arc<Vec<String>>,
}

impl<S> Service<Request<Body>> for ShutdownGuardService<S>
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
        let path = req.uri().path();
        if self.tracker.is_shutting_down() && !self.exempt.iter().any(|p| p == path) {
            debug!(path = %path, "Rejecting request during shutdown");
            let mut response = AppError::ServiceUnavailable.into_response();
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}
