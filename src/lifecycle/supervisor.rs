//! Background task supervision.
//!
//! Tasks spawned through [`FaultReporter::spawn_supervised`] are watched: a
//! returned error or a panic becomes a [`Fault`] on the fault channel, which
//! the binary treats as a process-level failure and answers with a graceful
//! shutdown. Cancellation through the returned [`AbortHandle`] is not a fault.

use std::any::Any;
use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error};

use crate::error::AppResult;

/// A process-level failure raised by a supervised task.
#[derive(Debug, Clone)]
pub struct Fault {
    pub task: &'static str,
    pub message: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task, self.message)
    }
}

/// Sending half of the fault channel.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<Fault>,
}

/// Create a fault channel.
pub fn fault_channel() -> (FaultReporter, mpsc::UnboundedReceiver<Fault>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FaultReporter { tx }, rx)
}

impl FaultReporter {
    /// Report a fault. Dropped silently once the receiver is gone.
    pub fn report(&self, task: &'static str, message: impl Into<String>) {
        let fault = Fault {
            task,
            message: message.into(),
        };
        error!(task = fault.task, error = %fault.message, "Background task failed");
        let _ = self.tx.send(fault);
    }

    /// Spawn `future` and report its failure or panic as a fault.
    pub fn spawn_supervised<F>(&self, task: &'static str, future: F) -> AbortHandle
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let abort = handle.abort_handle();
        let reporter = self.clone();

        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => debug!(task, "Background task finished"),
                Ok(Err(e)) => reporter.report(task, e.to_string()),
                Err(e) if e.is_panic() => {
                    reporter.report(task, panic_message(&*e.into_panic()));
                }
                Err(_) => debug!(task, "Background task cancelled"),
            }
        });

        abort
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::time::Duration;

    async fn failing() -> AppResult<()> {
        Err(AppError::Internal("lost upstream".into()))
    }

    async fn exploding() -> AppResult<()> {
        panic!("boom")
    }

    async fn sleeping() -> AppResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn finishing() -> AppResult<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_error_becomes_fault() {
        let (reporter, mut faults) = fault_channel();
        reporter.spawn_supervised("flaky", failing());

        let fault = faults.recv().await.unwrap();
        assert_eq!(fault.task, "flaky");
        assert!(fault.message.contains("lost upstream"));
    }

    #[tokio::test]
    async fn test_panic_becomes_fault() {
        let (reporter, mut faults) = fault_channel();
        reporter.spawn_supervised("explosive", exploding());

        let fault = faults.recv().await.unwrap();
        assert_eq!(fault.task, "explosive");
        assert_eq!(fault.message, "panicked: boom");
    }

    #[tokio::test]
    async fn test_success_and_abort_are_not_faults() {
        let (reporter, mut faults) = fault_channel();
        reporter.spawn_supervised("quick", finishing());
        let handle = reporter.spawn_supervised("sleepy", sleeping());
        handle.abort();

        drop(reporter);
        let received = tokio::time::timeout(Duration::from_millis(200), faults.recv()).await;
        // Channel closes without a fault once every sender is dropped
        assert!(matches!(received, Ok(None)));
    }
}
