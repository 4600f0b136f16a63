//! # Hardened API
//!
//! A security-hardened HTTP API scaffold built on Axum, featuring:
//!
//! - **Input Safety**: Size-limited body parsing, parameter pollution
//!   protection, declarative schema validation with all violations reported
//! - **Abuse Protection**: Per-client rate limiting, strict CORS whitelist
//! - **Response Hardening**: Security headers, environment-aware error
//!   envelopes with reference ids and redacted validation detail
//! - **Lifecycle**: Tracked connections and timers, graceful drain on
//!   signals or background-task faults
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Server (accept loop, TLS, connection tracking)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline (Errors → Headers → Rate Limit → Drain Guard →    │
//! │            CORS → Body → Pollution → Validate)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, users, items, contact)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Lifecycle (ResourceTracker, ShutdownController, faults)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hardened_api::{AppState, Config, ResourceTracker, Server, ShutdownController, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let tracker = Arc::new(ResourceTracker::new());
//!     let controller = Arc::new(ShutdownController::new(
//!         tracker.clone(),
//!         config.shutdown_timeout,
//!     ));
//!
//!     let server = Server::bind(&config).await?;
//!     let app = build_router(AppState::new(config, tracker)?);
//!     server.run(app, controller).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Production mode (strict CSP, HSTS preload, generic error messages):
//! ```bash
//! APP_ENV=production CORS_ORIGIN=https://app.example.com cargo run
//! ```
//!
//! Tighter rate limiting:
//! ```bash
//! RATE_LIMIT_WINDOW_MS=60000 RATE_LIMIT_MAX=30 cargo run
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod schemas;
pub mod server;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::{Config, Environment};
pub use context::RequestContext;
pub use error::{AppError, AppResult};
pub use lifecycle::{ResourceTracker, ShutdownController, ShutdownTrigger};
pub use routes::build_router;
pub use server::Server;
pub use state::AppState;
