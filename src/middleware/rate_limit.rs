//! Per-client rate limiting.
//!
//! # Algorithm
//!
//! Fixed-window counting. Each client owns one entry `(window_start, count)`:
//!
//! - The first request from a client opens a window at that instant
//! - Every accepted request increments the count; once it reaches `max`,
//!   further requests inside the window are rejected
//! - A request at or after `window_start + window` opens a fresh window
//!
//! The check and the increment run under the entry's shard lock, so
//! concurrent requests from one client can never both take the last slot.
//!
//! # Response Headers
//!
//! On every non-exempt response:
//! - `RateLimit-Limit`: configured requests per window
//! - `RateLimit-Remaining`: requests left in the current window
//! - `RateLimit-Reset`: seconds until the current window ends
//!
//! On rejection (429) additionally `Retry-After`.
//!
//! # Keys and Exemptions
//!
//! The key defaults to the client address resolved by [`client_key`]; both the
//! key function and the skip predicate are injectable. Skipped requests
//! neither consume nor observe any quota.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, header};
use axum::response::IntoResponse;
use dashmap::DashMap;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, client_key};
use crate::config::Config;
use crate::error::AppError;

pub const RATELIMIT_LIMIT: &str = "ratelimit-limit";
pub const RATELIMIT_REMAINING: &str = "ratelimit-remaining";
pub const RATELIMIT_RESET: &str = "ratelimit-reset";

/// Error type for rate limit layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Max requests per window cannot be zero.
    ZeroMax,
    /// Window duration cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroMax => {
                write!(
                    f,
                    "max requests must be greater than 0; disable rate limiting instead"
                )
            }
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// One client's current window.
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    start: Instant,
    count: u32,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32, reset: Duration },
    Limited { reset: Duration },
}

/// In-memory fixed-window counters keyed by client.
#[derive(Debug)]
pub struct FixedWindowStore {
    entries: DashMap<String, WindowEntry>,
    limit: u32,
    window: Duration,
}

impl FixedWindowStore {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    /// Count one request for `key` at `now`.
    pub fn check(&self, key: &str, now: Instant) -> Decision {
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert(WindowEntry { start: now, count: 0 });

        if now.saturating_duration_since(entry.start) >= self.window {
            *entry = WindowEntry { start: now, count: 0 };
        }
        let reset = (entry.start + self.window).saturating_duration_since(now);

        if entry.count >= self.limit {
            return Decision::Limited { reset };
        }
        entry.count += 1;
        Decision::Allowed {
            remaining: self.limit - entry.count,
            reset,
        }
    }

    /// Drop entries whose window has ended. Returns the number still tracked.
    pub fn purge_expired(&self, now: Instant) -> usize {
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.start) < self.window);
        self.entries.shrink_to_fit();
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Maps a request to the identity whose quota it consumes.
pub type KeyExtractor = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// Returns `true` for requests that bypass rate limiting.
pub type SkipPredicate = Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>;

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(100, Duration::from_secs(900))?
///     .skip_paths(vec!["/health".into()]);
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    store: Arc<FixedWindowStore>,
    key_extractor: KeyExtractor,
    skip: SkipPredicate,
}

impl fmt::Debug for RateLimitLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("limit", &self.store.limit)
            .field("window", &self.store.window)
            .finish_non_exhaustive()
    }
}

impl RateLimitLayer {
    /// Create a layer allowing `max` requests per client per `window`.
    ///
    /// Keys default to the socket peer address, nothing is skipped.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::ZeroMax` if `max` is 0 and
    /// `RateLimitError::ZeroWindow` if `window` is zero.
    pub fn new(max: u32, window: Duration) -> Result<Self, RateLimitError> {
        if max == 0 {
            return Err(RateLimitError::ZeroMax);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        let trusted = TrustedProxyConfig::default();

        Ok(Self {
            store: Arc::new(FixedWindowStore::new(max, window)),
            key_extractor: Arc::new(move |req| client_key(req, &trusted).into_owned()),
            skip: Arc::new(|_| false),
        })
    }

    /// Build from configuration. Returns `Ok(None)` when disabled.
    pub fn from_config(config: &Config) -> Result<Option<Self>, RateLimitError> {
        if !config.rate_limiting_enabled() {
            return Ok(None);
        }

        let layer = Self::new(config.rate_limit_max, config.rate_limit_window)?
            .trusted_proxies(TrustedProxyConfig::new(&config.trusted_proxies))
            .skip_paths(config.rate_limit_skip_paths.clone());
        Ok(Some(layer))
    }

    /// Resolve keys through the client address, honoring forwarded headers
    /// from `trusted` peers.
    pub fn trusted_proxies(self, trusted: TrustedProxyConfig) -> Self {
        self.key_extractor(move |req| client_key(req, &trusted).into_owned())
    }

    pub fn key_extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_extractor = Arc::new(f);
        self
    }

    pub fn skip_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        self.skip = Arc::new(f);
        self
    }

    /// Exempt the given paths (exact match).
    pub fn skip_paths(self, paths: Vec<String>) -> Self {
        self.skip_if(move |req| paths.iter().any(|p| p == req.uri().path()))
    }

    pub fn limit(&self) -> u32 {
        self.store.limit
    }

    pub fn window(&self) -> Duration {
        self.store.window
    }

    /// Drop clients whose window has ended and release the memory.
    ///
    /// Returns the number of clients still tracked.
    pub fn purge_idle(&self) -> usize {
        self.store.purge_expired(Instant::now())
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

        if (self.layer.skip)(&req) {
            return Box::pin(async move { inner.call(req).await });
        }

        let layer = self.layer.clone();
        let key = (layer.key_extractor)(&req);
        let limit = layer.limit();

        Box::pin(async move {
            match layer.store.check(&key, Instant::now()) {
                Decision::Allowed { remaining, reset } => {
                    let mut response = inner.call(req).await?;
                    insert_headers(&mut response, limit, remaining, ceil_secs(reset));
                    Ok(response)
                }
                Decision::Limited { reset } => {
                    let retry_after = ceil_secs(reset).max(1);

                    warn!(
                        client = %key,
                        path = %req.uri().path(),
                        retry_after_secs = retry_after,
                        "Rate limit exceeded"
                    );

                    let mut response = AppError::RateLimitExceeded {
                        retry_after_secs: retry_after,
                    }
                    .into_response();
                    insert_headers(&mut response, limit, 0, retry_after);
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                    Ok(response)
                }
            }
        })
    }
}

fn insert_headers(response: &mut Response<Body>, limit: u32, remaining: u32, reset: u64) {
    let headers = response.headers_mut();
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(reset));
}

/// Periodically evict idle clients from the in-memory store.
pub(crate) fn housekeeping_tick(layer: &RateLimitLayer) {
    let tracked = layer.purge_idle();
    debug!(tracked_clients = tracked, "Rate limiter housekeeping");
}
