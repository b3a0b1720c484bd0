//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (server.rs):
//!     Config → Templates → Bus → Bridge subscribe → HTTP listener
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Bridge drains, HTTP stops accepting → Join under deadline
//!     → Abort stragglers → Close bus
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Shutdown has a deadline; overrunning it is reported, not fatal

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownTimeoutError};
pub use signals::{ProcessSignal, SignalListener};
