//! Message-bus subsystem.
//!
//! # Data Flow
//! ```text
//! Front-end publishes RequestEnvelope → request topic
//!     → bridge.rs (consume under the server's consumer group)
//!     → render/ pipeline
//!     → envelope.rs (ResponseEnvelope, same request id)
//!     → response topic → client.rs (match pending request by id)
//! ```
//!
//! # Design Decisions
//! - The bus client is a trait seam; `connect` picks a backend from the
//!   configured endpoint URL
//! - Bus handles are owned by the bridge and the client, nothing else
//! - At-least-once on the inbound side; no publish retries

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::resilience::Elapsed;

pub mod bridge;
pub mod client;
pub mod envelope;
pub mod kafka;
pub mod memory;

pub use bridge::{Bridge, BridgeCounters, BridgeHandle, BridgeSettings, BridgeState, BridgeStats};
pub use client::{ClientError, RenderClient, RequestOptions};
pub use envelope::{EnvelopeError, RequestEnvelope, ResponseEnvelope};
pub use kafka::{KafkaBus, KafkaEndpoint};
pub use memory::InMemoryBus;

/// Errors raised by a bus backend.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid bus endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("unsupported bus endpoint scheme: {0}")]
    UnsupportedEndpoint(String),

    #[error("cannot reach bus at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("topic {0} does not exist")]
    UnknownTopic(String),

    #[error("bus connection closed")]
    Closed,

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("consume failed: {0}")]
    Consume(String),

    #[error(transparent)]
    Timeout(#[from] Elapsed),
}

/// One message on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Partitioning key; the request id for envelopes.
    pub key: Option<String>,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            key: Some(key.into()),
            payload: payload.into(),
        }
    }

    pub fn unkeyed(payload: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            payload: payload.into(),
        }
    }
}

/// Publish/subscribe client.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError>;

    /// Join `group` on `topic`. Members of one group share the topic's
    /// messages; each group sees every message.
    async fn subscribe(&self, topic: &str, group: &str)
        -> Result<Box<dyn Subscription>, BusError>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<(), BusError>;
}

/// A consumer-group membership on one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `Ok(None)` once the bus is closed.
    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError>;
}

/// Build a bus client from an endpoint URL.
///
/// Supported:
/// - `memory://<name>[?retention=<n>]`, in-process only
/// - `kafka://host:port[,host:port...]`, connected on first use
pub fn connect(endpoint: &str) -> Result<Arc<dyn MessageBus>, BusError> {
    // Broker lists are not valid URLs, so this scheme is matched first.
    if endpoint.starts_with("kafka://") {
        let endpoint = KafkaEndpoint::parse(endpoint)?;
        tracing::info!(brokers = ?endpoint.brokers, "Using Kafka bus");
        return Ok(Arc::new(KafkaBus::new(endpoint)));
    }

    let url = Url::parse(endpoint).map_err(|e| BusError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "memory" => {
            let mut bus = InMemoryBus::new();
            if let Some((_, value)) = url.query_pairs().find(|(k, _)| k == "retention") {
                let retention = value.parse().map_err(|_| BusError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: format!("retention must be a positive integer, got {value:?}"),
                })?;
                bus = InMemoryBus::with_retention(retention);
            }
            tracing::info!(endpoint, "Connected to in-memory bus");
            Ok(Arc::new(bus))
        }
        other => Err(BusError::UnsupportedEndpoint(other.to_string())),
    }
}
