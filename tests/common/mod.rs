//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ssr_gateway::bus::{
    BusError, BusMessage, InMemoryBus, MessageBus, ResponseEnvelope, Subscription,
};
use ssr_gateway::config::{ConfigStore, ServerConfig};
use ssr_gateway::render::{EngineError, MiniJinjaRenderer, PageRenderer, RenderContext};
use ssr_gateway::Server;
use tokio::net::TcpListener;

pub const REQUEST_TOPIC: &str = "ssr-requests";
pub const RESPONSE_TOPIC: &str = "ssr-responses";

/// Templates for the default route table. `products.tmpl` is deliberately
/// absent so `/products` exercises the engine failure path.
pub fn page_templates() -> Vec<(&'static str, &'static str)> {
    vec![
        ("index.tmpl", "<h1>Home</h1>"),
        ("about.tmpl", "<h1>About{% if name %} {{ name }}{% endif %}</h1>"),
        ("product-detail.tmpl", "<h1>Product {{ id }}</h1>"),
        ("default.tmpl", "<h1>Page not found: {{ path }}</h1>"),
    ]
}

pub fn renderer() -> Arc<MiniJinjaRenderer> {
    Arc::new(MiniJinjaRenderer::from_sources(page_templates()).unwrap())
}

/// Default configuration with short timeouts for tests.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.timeouts.render_ms = 2_000;
    config.timeouts.publish_ms = 500;
    config.timeouts.shutdown_secs = 2;
    config
}

/// Renderer that sleeps before delegating.
///
/// The delay is `delay_ms` from the render context when present, otherwise
/// the fixed default.
pub struct SlowRenderer {
    pub default_delay: Duration,
    pub inner: Arc<dyn PageRenderer>,
    pub calls: AtomicUsize,
}

impl SlowRenderer {
    pub fn new(default_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            default_delay,
            inner: renderer(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl PageRenderer for SlowRenderer {
    fn render(&self, target: &str, context: &RenderContext) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = context
            .get("delay_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(self.default_delay);
        std::thread::sleep(delay);
        self.inner.render(target, context)
    }
}

/// How [`FaultyBus`] treats publishes to the faulty topic.
#[derive(Clone, Copy)]
pub enum PublishFault {
    /// Fail the first `n` publishes, then behave.
    FailFirst(usize),
    /// Never complete.
    Hang,
}

/// In-memory bus whose publishes to one topic misbehave.
pub struct FaultyBus {
    pub inner: InMemoryBus,
    topic: &'static str,
    fault: PublishFault,
    attempts: AtomicUsize,
}

impl FaultyBus {
    pub fn new(inner: InMemoryBus, topic: &'static str, fault: PublishFault) -> Arc<Self> {
        Arc::new(Self {
            inner,
            topic,
            fault,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for FaultyBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        if topic == self.topic {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.fault {
                PublishFault::FailFirst(n) if attempt < n => {
                    return Err(BusError::Publish {
                        topic: topic.to_string(),
                        reason: "injected failure".to_string(),
                    });
                }
                PublishFault::Hang => std::future::pending::<()>().await,
                PublishFault::FailFirst(_) => {}
            }
        }
        self.inner.publish(topic, message).await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BusError> {
        self.inner.subscribe(topic, group).await
    }

    async fn close(&self) -> Result<(), BusError> {
        self.inner.close().await
    }
}

/// Build and start a server on an ephemeral port.
pub async fn start_server(
    config: ServerConfig,
    engine: Arc<dyn PageRenderer>,
    bus: Arc<dyn MessageBus>,
) -> Arc<Server> {
    let server = Arc::new(Server::with_components(
        Arc::new(ConfigStore::new(config)),
        engine,
        bus,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    server.start(listener).await.unwrap();
    server
}

/// Publish a raw JSON request payload keyed by `key`.
pub async fn publish_raw(bus: &dyn MessageBus, key: &str, payload: &str) {
    bus.publish(REQUEST_TOPIC, BusMessage::new(key, payload.as_bytes().to_vec()))
        .await
        .unwrap();
}

/// Publish a GET request for `path` with `body` as raw JSON.
pub async fn publish_request(bus: &dyn MessageBus, id: &str, path: &str, body: &str) {
    let payload = format!(r#"{{"id":"{id}","path":"{path}","method":"GET","headers":{{}},"body":{body},"timestamp":0}}"#);
    publish_raw(bus, id, &payload).await;
}

/// Collect `count` responses, failing the test if they do not arrive in time.
pub async fn collect_responses(
    subscription: &mut dyn Subscription,
    count: usize,
    within: Duration,
) -> Vec<ResponseEnvelope> {
    let deadline = Instant::now() + within;
    let mut responses = Vec::with_capacity(count);
    while responses.len() < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = tokio::time::timeout(remaining, subscription.next_message())
            .await
            .unwrap_or_else(|_| panic!("only {} of {count} responses arrived", responses.len()))
            .unwrap()
            .expect("bus closed early");
        responses.push(ResponseEnvelope::decode(&message.payload).unwrap());
    }
    responses
}

/// Assert nothing else arrives on `subscription` for `quiet`.
pub async fn assert_no_more(subscription: &mut dyn Subscription, quiet: Duration) {
    if let Ok(Ok(Some(message))) = tokio::time::timeout(quiet, subscription.next_message()).await {
        panic!(
            "unexpected extra message: {}",
            String::from_utf8_lossy(&message.payload)
        );
    }
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn wait_until(within: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + within;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {within:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
