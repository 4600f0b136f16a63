//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │ Error Formatter  │ ← renders every AppError into the JSON envelope
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← CSP, HSTS, frame/sniff/referrer policies
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (skips /health)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Shutdown Guard  │ ← 503 once draining (skips /health)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Origin Guard +   │ ← 403 for foreign origins, preflight answers
//! │      CORS        │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Parser    │ ← 413 too large, 400 malformed JSON
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Pollution Guard  │ ← repeated parameters collapse to the last value
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Catch Panic    │ ← handler panics become 500
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Validate (route) │ ← 400 with every violated rule
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! Rate limiting runs before the shutdown guard, so requests rejected while
//! draining still count against the client's quota.
//!
//! # Route Groups
//!
//! - `/health` - Health probe (exempt from rate limiting and the drain guard)
//! - `/api/users` - Simulated user resource
//! - `/api/items/{id}` - Simulated item lookup
//! - `/api/contact` - Contact form (JSON or URL-encoded)

use std::any::Any;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AppError;
use crate::handlers;
use crate::lifecycle::panic_message;
use crate::middleware::{
    BodyParser, ErrorFormatter, OriginGuardLayer, PollutionGuard, SecurityHeadersLayer,
    ShutdownGuardLayer, ValidateLayer, build_cors_layer, format_errors, guard_pollution,
    parse_body,
};
use crate::schemas;
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Rate Limiting**: Enabled if `rate_limit_max > 0`
/// - **CORS**: Origin whitelist from `cors_origins`
/// - **Security headers / error detail**: From `environment`
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();
    let user_id = || ValidateLayer::new().params(schemas::user_id(config.user_id_format));

    // =========================================================================
    // Build Router with Routes
    // =========================================================================
    let mut router = Router::new()
        // Health (always accessible)
        .route("/health", get(handlers::health_check))
        // Users
        .route(
            "/api/users",
            get(handlers::list_users).layer(ValidateLayer::new().query(schemas::list_users())),
        )
        .route(
            "/api/users",
            post(handlers::create_user).layer(ValidateLayer::new().body(schemas::create_user())),
        )
        .route("/api/users/{id}", get(handlers::get_user).layer(user_id()))
        .route(
            "/api/users/{id}",
            put(handlers::update_user).layer(user_id().body(schemas::update_user())),
        )
        .route("/api/users/{id}", delete(handlers::delete_user).layer(user_id()))
        // Items
        .route(
            "/api/items/{id}",
            get(handlers::get_item).layer(ValidateLayer::new().params(schemas::item_id())),
        )
        // Contact
        .route(
            "/api/contact",
            post(handlers::submit_contact).layer(ValidateLayer::new().body(schemas::contact())),
        )
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed);

    // =========================================================================
    // Apply Middleware Stack (applied innermost first)
    // =========================================================================

    // 1. Handler panics become 500s instead of dropped connections
    router = router.layer(CatchPanicLayer::custom(handle_panic));

    // 2. Parameter pollution guard
    if !config.parameter_whitelist.is_empty() {
        info!(
            fields = ?config.parameter_whitelist,
            "Parameters allowed to repeat"
        );
    }
    router = router.layer(from_fn_with_state(
        PollutionGuard::from_config(&config),
        guard_pollution,
    ));

    // 3. Body parsing with size limit
    info!(limit_bytes = config.body_limit, "Request body limit configured");
    router = router.layer(from_fn_with_state(
        BodyParser::from_config(&config),
        parse_body,
    ));

    // 4. CORS, behind the origin guard
    info!(origins = ?config.cors_origins, "CORS whitelist configured");
    router = router.layer(build_cors_layer(&config));
    router = router.layer(OriginGuardLayer::from_config(&config));

    // 5. Shutdown guard
    router = router.layer(ShutdownGuardLayer::new(state.tracker.clone()));

    // 6. Rate limiting (if enabled)
    match &state.rate_limiter {
        Some(limiter) => {
            info!(
                max = config.rate_limit_max,
                window_secs = config.rate_limit_window.as_secs(),
                trusted_proxies = config.trusted_proxies.len(),
                "Rate limiting enabled"
            );
            router = router.layer(limiter.clone());
        }
        None => info!("Rate limiting disabled (RATE_LIMIT_MAX=0)"),
    }

    // 7. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 8. Security headers
    router = router.layer(SecurityHeadersLayer::from_config(&config));

    // 9. Error formatter (outermost, sees every failure)
    router = router.layer(from_fn_with_state(
        ErrorFormatter::from_config(&config),
        format_errors,
    ));

    router.with_state(state)
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    AppError::Internal(panic_message(&*payload)).into_response()
}
