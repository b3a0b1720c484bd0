//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap renders, publishes and client waits with a deadline
//! - Report which operation overran and by what limit
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Dropping the timed-out future is the only cancellation performed

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// An operation exceeded its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} timed out after {limit:?}")]
pub struct Elapsed {
    pub operation: &'static str,
    pub limit: Duration,
}

/// Await `fut` for at most `limit`.
pub async fn with_timeout<F: Future>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Elapsed { operation, limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_limit() {
        let value = with_timeout("noop", Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_reports_elapsed() {
        let err = with_timeout("publish", Duration::from_millis(10), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(err.operation, "publish");
        assert_eq!(err.to_string(), "publish timed out after 10ms");
    }
}
