//! Front-end side of the bridge.
//!
//! # Responsibilities
//! - Publish request envelopes with fresh correlation ids
//! - Route responses, arriving in any order, back to the waiting caller
//! - Give up on a request after its timeout and forget it
//!
//! # Design Decisions
//! - One listener task per client drains the response topic under a
//!   client-unique consumer group, so every client sees every response
//! - Pending requests live in a concurrent map keyed by id; the entry is
//!   removed when the caller stops waiting for any reason
//! - Responses for ids this client does not know are ignored

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::envelope::{EnvelopeError, RequestEnvelope, ResponseEnvelope};
use crate::bus::{BusError, BusMessage, MessageBus, Subscription};
use crate::config::ServerConfig;
use crate::resilience::with_timeout;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const LISTENER_ERROR_PAUSE: Duration = Duration::from_millis(100);

type Pending = DashMap<String, oneshot::Sender<ResponseEnvelope>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("render failed with status {status}: {message}")]
    Render { status: u16, message: String },

    #[error("response listener stopped")]
    Disconnected,

    #[error("request id already outstanding: {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

/// Per-request options for [`RenderClient::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Defaults to `GET`.
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// JSON context payload.
    pub body: Option<Value>,
    /// Overrides the client's default timeout.
    pub timeout: Option<Duration>,
}

/// Correlating client for the render bridge.
pub struct RenderClient {
    bus: Arc<dyn MessageBus>,
    request_topic: String,
    pending: Arc<Pending>,
    default_timeout: Duration,
    listener: JoinHandle<()>,
}

impl RenderClient {
    /// Subscribe to `response_topic` and start routing responses.
    pub async fn connect(
        bus: Arc<dyn MessageBus>,
        request_topic: impl Into<String>,
        response_topic: &str,
    ) -> Result<Self, ClientError> {
        let group = format!("ssr-client-{}", Uuid::new_v4());
        let subscription = bus.subscribe(response_topic, &group).await?;

        let pending = Arc::new(Pending::new());
        let listener = tokio::spawn(listen(subscription, Arc::clone(&pending)));
        tracing::debug!(group = %group, topic = response_topic, "Render client listening");

        Ok(Self {
            bus,
            request_topic: request_topic.into(),
            pending,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            listener,
        })
    }

    /// Connect using the topics named in `config`.
    pub async fn from_config(
        bus: Arc<dyn MessageBus>,
        config: &ServerConfig,
    ) -> Result<Self, ClientError> {
        let client = Self::connect(
            bus,
            config.bridge.request_topic.as_str(),
            &config.bridge.response_topic,
        )
        .await?;
        Ok(client.with_timeout(config.timeouts.request()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Number of requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Request a render of `path` and wait for the correlated response.
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let mut envelope = RequestEnvelope::new(Uuid::new_v4().to_string(), path);
        if let Some(method) = options.method {
            envelope.method = method;
        }
        envelope.headers = options.headers;
        if let Some(body) = &options.body {
            envelope = envelope.with_body(body)?;
        }

        self.send(envelope, options.timeout.unwrap_or(self.default_timeout))
            .await
    }

    /// Publish a caller-built envelope and wait up to `timeout` for its reply.
    ///
    /// Fails with [`ClientError::DuplicateId`] if a request with the same id
    /// is still outstanding on this client.
    pub async fn send(
        &self,
        envelope: RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope, ClientError> {
        let id = envelope.id.clone();
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err(ClientError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        let _pending = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        let payload = envelope.encode()?;
        self.bus
            .publish(&self.request_topic, BusMessage::new(id.as_str(), payload))
            .await?;

        let response = match with_timeout("render request", timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::Disconnected),
            Err(_) => {
                tracing::warn!(request_id = %id, timeout = ?timeout, "Render request timed out");
                return Err(ClientError::Timeout(timeout));
            }
        };

        match response.error {
            Some(message) => Err(ClientError::Render {
                status: response.status,
                message,
            }),
            None => Ok(response),
        }
    }
}

impl Drop for RenderClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Removes the pending entry when the waiting caller goes away.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

async fn listen(mut subscription: Box<dyn Subscription>, pending: Arc<Pending>) {
    loop {
        match subscription.next_message().await {
            Ok(Some(message)) => dispatch(&pending, &message.payload),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read from response topic");
                tokio::time::sleep(LISTENER_ERROR_PAUSE).await;
            }
        }
    }

    // Dropping the senders wakes every waiter with `Disconnected`.
    pending.clear();
    tracing::debug!("Render client listener stopped");
}

fn dispatch(pending: &Pending, payload: &[u8]) {
    let response = match ResponseEnvelope::decode(payload) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring undecodable response");
            return;
        }
    };

    match pending.remove(&response.request_id) {
        Some((_, waiter)) => {
            // The caller may have given up between lookup and send.
            let _ = waiter.send(response);
        }
        None => {
            tracing::trace!(request_id = %response.request_id, "Response for unknown request");
        }
    }
}
