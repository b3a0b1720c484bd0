//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, Accept negotiation, context payload)
//!     → {api_prefix}/*  → echo {path, time, handler?}
//!     → /static/*       → files under static_dir
//!     → anything else   → render/ pipeline
//!     → response.rs (markup, {html, state} JSON, or 500 text)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{ApiEcho, RenderedPage};
pub use server::{AppState, HttpServer};
