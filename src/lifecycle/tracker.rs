//! Registry of live resources the shutdown sequence must release.
//!
//! The tracker owns three things:
//!
//! - **Connections**: one [`CancellationToken`] per accepted socket. Cancelling
//!   it asks the connection task to stop serving.
//! - **Timers**: [`AbortHandle`]s of periodic background tasks.
//! - **Shutdown flag**: monotonic; once set it is never cleared.
//!
//! Every set mutation happens inside a short `std::sync::Mutex` critical
//! section that never spans an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifier of a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Identifier of a tracked timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Async callback run once during shutdown, after connections and timers are gone.
pub type CleanupHook = Arc<dyn Fn() -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

pub struct ResourceTracker {
    connections: Mutex<HashMap<ConnectionId, CancellationToken>>,
    timers: Mutex<HashMap<TimerId, AbortHandle>>,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
    cleanup_hook: CleanupHook,
}

impl fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("connections", &self.connection_count())
            .field("timers", &self.timer_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTracker {
    /// Create a tracker with a no-op cleanup hook.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            cleanup_hook: Arc::new(|| -> BoxFuture<anyhow::Result<()>> {
                Box::pin(async { Ok(()) })
            }),
        }
    }

    /// Create a tracker that awaits `hook` during shutdown.
    pub fn with_cleanup<F, Fut>(hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            cleanup_hook: Arc::new(move || -> BoxFuture<anyhow::Result<()>> {
                Box::pin(hook())
            }),
            ..Self::new()
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Register a new connection and return its close signal.
    ///
    /// Once shutdown has begun the returned token is already cancelled and
    /// the connection is not tracked.
    pub fn add_connection(&self) -> (ConnectionId, CancellationToken) {
        let id = ConnectionId(self.next_id());
        let token = CancellationToken::new();

        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so a concurrent close_all_connections cannot miss it
        if self.is_shutting_down() {
            token.cancel();
        } else {
            connections.insert(id, token.clone());
        }
        (id, token)
    }

    /// Forget a connection that closed on its own. Returns whether it was tracked.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Signal every tracked connection to close. Returns how many were signalled.
    pub fn close_all_connections(&self) -> usize {
        let drained: Vec<CancellationToken> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, token)| token)
            .collect();

        for token in &drained {
            token.cancel();
        }
        drained.len()
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Track a background task so shutdown can abort it.
    pub fn add_timer(&self, handle: AbortHandle) -> TimerId {
        let id = TimerId(self.next_id());
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        debug!(timer = id.0, "Timer registered");
        id
    }

    /// Abort and forget one timer. Returns whether it was tracked.
    pub fn remove_timer(&self, id: TimerId) -> bool {
        let handle = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn timer_count(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Abort every tracked timer. Calling it again is a no-op returning 0.
    pub fn clear_all_timers(&self) -> usize {
        let drained: Vec<AbortHandle> = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Run the cleanup hook.
    pub async fn cleanup(&self) -> anyhow::Result<()> {
        (self.cleanup_hook)().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Set the shutdown flag. Returns `false` if it was already set.
    pub(crate) fn begin_shutdown(&self) -> bool {
        // Taken under the connection lock to pair with add_connection
        let _connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn sleeper() -> AbortHandle {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600))).abort_handle()
    }

    #[test]
    fn test_add_and_remove_connection() {
        let tracker = ResourceTracker::new();
        let (id, token) = tracker.add_connection();
        assert_eq!(tracker.connection_count(), 1);
        assert!(!token.is_cancelled());

        assert!(tracker.remove_connection(id));
        assert!(!tracker.remove_connection(id));
        assert_eq!(tracker.connection_count(), 0);
    }

    #[test]
    fn test_close_all_connections_cancels_tokens() {
        let tracker = ResourceTracker::new();
        let (_, a) = tracker.add_connection();
        let (_, b) = tracker.add_connection();

        assert_eq!(tracker.close_all_connections(), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(tracker.connection_count(), 0);
        assert_eq!(tracker.close_all_connections(), 0);
    }

    #[test]
    fn test_connections_after_shutdown_start_closed() {
        let tracker = ResourceTracker::new();
        assert!(tracker.begin_shutdown());

        let (_, token) = tracker.add_connection();
        assert!(token.is_cancelled());
        assert_eq!(tracker.connection_count(), 0);
    }

    #[test]
    fn test_shutdown_flag_is_monotonic() {
        let tracker = ResourceTracker::new();
        assert!(!tracker.is_shutting_down());
        assert!(tracker.begin_shutdown());
        assert!(!tracker.begin_shutdown());
        assert!(tracker.is_shutting_down());
    }

    #[tokio::test]
    async fn test_clear_all_timers_is_idempotent() {
        let tracker = ResourceTracker::new();
        tracker.add_timer(sleeper());
        tracker.add_timer(sleeper());

        assert_eq!(tracker.clear_all_timers(), 2);
        assert_eq!(tracker.clear_all_timers(), 0);
        assert_eq!(tracker.timer_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_timer_aborts_task() {
        let tracker = ResourceTracker::new();
        let task = tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)));
        let id = tracker.add_timer(task.abort_handle());

        assert!(tracker.remove_timer(id));
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!tracker.remove_timer(id));
    }

    #[tokio::test]
    async fn test_default_cleanup_is_noop() {
        let tracker = ResourceTracker::new();
        assert!(tracker.cleanup().await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_hook_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let tracker = ResourceTracker::with_cleanup(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

        tracker.cleanup().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_hook_error_propagates() {
        let tracker = ResourceTracker::with_cleanup(|| async {
            Err::<(), _>(anyhow::anyhow!("flush failed"))
        });
        let err = tracker.cleanup().await.unwrap_err();
        assert!(err.to_string().contains("flush failed"));
    }
}
