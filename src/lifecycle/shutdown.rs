//! Shutdown coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;

/// Drain did not finish before the caller's deadline.
///
/// Reported to the caller; the remaining tasks are aborted and shutdown
/// completes anyway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("shutdown deadline of {deadline:?} exceeded; still running: {}", .pending.join(", "))]
pub struct ShutdownTimeoutError {
    pub deadline: Duration,
    /// Components that had not stopped when the deadline passed.
    pub pending: Vec<&'static str>,
}

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Only the first call broadcasts; returns
    /// whether this call did.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.tx.send(());
        true
    }

}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers_once() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();

        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_timeout_error_message() {
        let err = ShutdownTimeoutError {
            deadline: Duration::from_secs(10),
            pending: vec!["bridge"],
        };
        assert_eq!(
            err.to_string(),
            "shutdown deadline of 10s exceeded; still running: bridge"
        );
    }
}
