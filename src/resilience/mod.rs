//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Render / publish / correlated wait:
//!     → timeouts.rs (enforce per-call deadline)
//!     → On elapse: caller turns it into an error response or a reported failure
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every render and publish has a deadline
//! - No retries: a failed publish is reported, not repeated

pub mod timeouts;

pub use timeouts::{with_timeout, Elapsed};
