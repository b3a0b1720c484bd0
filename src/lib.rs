//! Server-side render gateway library.
//!
//! Pages are rendered through two transports sharing one route table and
//! render pipeline: synchronous HTTP, and a message-bus bridge that answers
//! request envelopes with correlated response envelopes.

pub mod bus;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod render;
pub mod resilience;
pub mod routing;
pub mod server;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use server::{Server, StartupError};
