//! Shared application state for Axum handlers.
//!
//! Cloned into every handler; all heavy members sit behind `Arc`.
//!
//! # Background Work
//!
//! [`AppState::spawn_housekeeping`] starts the periodic rate-limiter sweep as
//! a supervised task and registers it with the [`ResourceTracker`], so the
//! drain sequence aborts it together with every other timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{FaultReporter, ResourceTracker, TimerId};
use crate::middleware::RateLimitLayer;
use crate::middleware::rate_limit::housekeeping_tick;

/// How often idle rate-limit entries are evicted.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Live connections, timers and the shutdown flag
    pub tracker: Arc<ResourceTracker>,
    /// Shared limiter; `None` when rate limiting is disabled
    pub rate_limiter: Option<RateLimitLayer>,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    /// Build state from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the rate-limit quota cannot be built.
    pub fn new(config: Config, tracker: Arc<ResourceTracker>) -> AppResult<Self> {
        let rate_limiter = RateLimitLayer::from_config(&config)
            .map_err(|e| AppError::Config(format!("Invalid rate limit: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            tracker,
            rate_limiter,
            started_at: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tracker.is_shutting_down()
    }

    /// Start the rate-limiter sweep. Returns `None` when rate limiting is off.
    pub fn spawn_housekeeping(&self, faults: &FaultReporter) -> Option<TimerId> {
        let limiter = self.rate_limiter.clone()?;
        let handle = faults.spawn_supervised("rate-limit-housekeeping", housekeeping(limiter));
        let id = self.tracker.add_timer(handle);
        info!(
            interval_secs = HOUSEKEEPING_INTERVAL.as_secs(),
            "Rate limiter housekeeping scheduled"
        );
        Some(id)
    }
}

async fn housekeeping(limiter: RateLimitLayer) -> AppResult<()> {
    let mut ticker = interval(HOUSEKEEPING_INTERVAL);
    ticker.tick().await; // Skip the first immediate tick

    loop {
        ticker.tick().await;
        debug!("Running rate limiter housekeeping");
        housekeeping_tick(&limiter);
    }
}
