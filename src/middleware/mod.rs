//! Request pipeline stages.
//!
//! # Architecture
//!
//! ```text
//! Request → Error Formatter → Security Headers → Trace → Rate Limit
//!         → Shutdown Guard → Origin Guard → CORS → Body Parser
//!         → Pollution Guard → Catch Panic → Validate (per route) → Handler
//! ```
//!
//! Every stage either passes the request on or answers with an
//! [`AppError`](crate::error::AppError) response; the error formatter turns
//! those into the final envelope on the way out.
//!
//! - **Rate Limit**: per-client fixed-window counter with `RateLimit-*` headers
//! - **Security Headers**: CSP, HSTS and friends, environment-aware
//! - **CORS**: exact-match origin whitelist, 403 for foreign origins
//! - **Body Parser**: size-limited JSON and URL-encoded decoding
//! - **Pollution Guard**: repeated parameters collapse to the last value
//! - **Validate**: declarative schemas for params, query and body
//! - **Shutdown Guard**: 503 once the drain has begun
//! - **Trusted Proxy Validation**: CIDR-based client address resolution

pub mod body;
pub mod cors;
pub mod error_formatter;
pub mod ip;
pub mod pollution;
pub mod rate_limit;
pub mod security_headers;
pub mod shutdown_guard;
pub mod validate;

pub use body::{BodyParser, parse_body};
pub use cors::{OriginGuardLayer, OriginWhitelist, build_cors_layer};
pub use error_formatter::{ErrorFormatter, format_errors, reference_id, scrub};
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, client_key, peer_ip};
pub use pollution::{PollutionGuard, collapse_repeated, guard_pollution, parse_urlencoded};
pub use rate_limit::{
    RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET, RateLimitError, RateLimitLayer,
};
pub use security_headers::SecurityHeadersLayer;
pub use shutdown_guard::ShutdownGuardLayer;
pub use validate::ValidateLayer;
