//! Graceful shutdown state machine.
//!
//! ```text
//!   Running ──(signal | fault)──► Draining ──(drain done | timeout)──► Terminated
//! ```
//!
//! # Drain Sequence
//!
//! Strictly ordered, the whole sequence racing the shutdown timeout:
//!
//! 1. Set the shutdown flag; new requests get 503 from the shutdown guard
//! 2. Stop the accept loop
//! 3. Signal every tracked connection to close and wait for the connection
//!    tasks (each gets a bounded grace period before it is dropped)
//! 4. Abort all tracked timers
//! 5. Await the cleanup hook
//!
//! A second trigger while draining or after termination is ignored.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::tracker::ResourceTracker;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const TERMINATED: u8 = 2;

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    Draining,
    Terminated,
}

/// What started the shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Termination signal by name (e.g. "SIGTERM")
    Signal(&'static str),
    /// Process-level failure
    Fault(String),
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Signal(name) => write!(f, "signal {name}"),
            ShutdownTrigger::Fault(message) => write!(f, "fault: {message}"),
        }
    }
}

/// How the drain sequence ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Completed,
    CleanupFailed(String),
    TimedOut,
}

/// Summary of one shutdown run.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub trigger: ShutdownTrigger,
    pub outcome: ShutdownOutcome,
    pub connections_closed: usize,
    pub timers_cleared: usize,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Success whenever the drain completed, whatever triggered it.
    pub fn exit_code(&self) -> exitcode::ExitCode {
        match self.outcome {
            ShutdownOutcome::Completed => exitcode::OK,
            ShutdownOutcome::CleanupFailed(_) | ShutdownOutcome::TimedOut => exitcode::SOFTWARE,
        }
    }
}

/// Coordinates the Running → Draining → Terminated transitions.
#[derive(Debug)]
pub struct ShutdownController {
    phase: AtomicU8,
    tracker: Arc<ResourceTracker>,
    accept: CancellationToken,
    connection_tasks: TaskTracker,
    timeout: Duration,
    connections_closed: AtomicUsize,
    timers_cleared: AtomicUsize,
}

impl ShutdownController {
    pub fn new(tracker: Arc<ResourceTracker>, timeout: Duration) -> Self {
        Self {
            phase: AtomicU8::new(RUNNING),
            tracker,
            accept: CancellationToken::new(),
            connection_tasks: TaskTracker::new(),
            timeout,
            connections_closed: AtomicUsize::new(0),
            timers_cleared: AtomicUsize::new(0),
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        match self.phase.load(Ordering::Acquire) {
            RUNNING => ShutdownPhase::Running,
            DRAINING => ShutdownPhase::Draining,
            _ => ShutdownPhase::Terminated,
        }
    }

    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.tracker
    }

    /// Cancelled when the accept loop must stop.
    pub fn accept_token(&self) -> CancellationToken {
        self.accept.clone()
    }

    /// Tracker for per-connection tasks; awaited during the drain.
    pub fn connection_tasks(&self) -> &TaskTracker {
        &self.connection_tasks
    }

    /// Run the drain sequence once.
    ///
    /// Returns `None` when a shutdown is already in progress or finished.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> Option<ShutdownReport> {
        if self
            .phase
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(trigger = %trigger, "Shutdown already in progress, ignoring");
            return None;
        }

        match &trigger {
            ShutdownTrigger::Signal(name) => {
                info!(signal = *name, "Received signal, starting graceful shutdown");
            }
            ShutdownTrigger::Fault(message) => {
                error!(error = %message, "Unrecoverable fault, starting graceful shutdown");
            }
        }

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.drain()).await {
            Ok(Ok(())) => ShutdownOutcome::Completed,
            Ok(Err(e)) => {
                error!(error = %e, "Cleanup hook failed");
                ShutdownOutcome::CleanupFailed(e.to_string())
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Shutdown timed out, forcing exit"
                );
                ShutdownOutcome::TimedOut
            }
        };
        self.phase.store(TERMINATED, Ordering::Release);

        let report = ShutdownReport {
            trigger,
            outcome,
            connections_closed: self.connections_closed.load(Ordering::Acquire),
            timers_cleared: self.timers_cleared.load(Ordering::Acquire),
            elapsed: started.elapsed(),
        };
        info!(
            outcome = ?report.outcome,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown finished"
        );
        Some(report)
    }

    async fn drain(&self) -> anyhow::Result<()> {
        self.tracker.begin_shutdown();

        self.accept.cancel();
        info!("Stopped accepting new connections");

        let closed = self.tracker.close_all_connections();
        self.connections_closed.store(closed, Ordering::Release);
        info!(connections = closed, "Closing open connections");
        self.connection_tasks.close();
        self.connection_tasks.wait().await;

        let cleared = self.tracker.clear_all_timers();
        self.timers_cleared.store(cleared, Ordering::Release);
        info!(timers = cleared, "Cleared timers");

        self.tracker.cleanup().await?;
        info!("Cleanup hook completed");
        Ok(())
    }
}
