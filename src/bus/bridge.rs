//! Bus → render → bus bridge.
//!
//! # Responsibilities
//! - Consume request envelopes from the request topic under a fixed group
//! - Render each one and publish exactly one correlated response
//! - Keep consuming when a single envelope fails to decode, render or publish
//! - Drain in-flight work on shutdown
//!
//! # Design Decisions
//! - One worker (the default) handles envelopes inline, so replies go out in
//!   processing order and a slow render throttles consumption
//! - More workers put a bounded queue between the consumer and the renders;
//!   replies stay one per envelope but lose cross-envelope ordering
//! - Shutdown is observed between envelopes, never mid-render
//! - Renders and publishes each run under their own deadline, read from the
//!   live configuration per envelope; a missed publish is reported, not retried

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::bus::envelope::{
    RequestEnvelope, ResponseEnvelope, MALFORMED_REASON, STATUS_BAD_REQUEST,
};
use crate::bus::{BusError, BusMessage, MessageBus, Subscription};
use crate::config::ServerConfig;
use crate::observability::metrics;
use crate::render::RenderPipeline;
use crate::resilience::with_timeout;

/// Pause after a failed read before polling the subscription again.
const CONSUME_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Bridge lifecycle: `Stopped → Running → Draining → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Running,
    Draining,
}

/// Bridge parameters bound at start.
///
/// Timeouts are not part of this: workers read them from the live
/// configuration for every envelope.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub request_topic: String,
    pub response_topic: String,
    pub consumer_group: String,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl BridgeSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            request_topic: config.bridge.request_topic.clone(),
            response_topic: config.bridge.response_topic.clone(),
            consumer_group: config.bridge.consumer_group.clone(),
            workers: config.bridge.workers.max(1),
            queue_capacity: config.bridge.queue_capacity.max(1),
        }
    }
}

/// Running totals kept by one bridge instance.
#[derive(Debug, Default)]
pub struct BridgeStats {
    received: AtomicU64,
    replied: AtomicU64,
    render_failures: AtomicU64,
    malformed: AtomicU64,
    skipped: AtomicU64,
    publish_failures: AtomicU64,
    consume_errors: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeCounters {
    /// Messages taken off the request topic.
    pub received: u64,
    /// Responses published (success or error).
    pub replied: u64,
    pub render_failures: u64,
    /// Undecodable envelopes answered with a 400.
    pub malformed: u64,
    /// Undecodable messages with no id to reply to.
    pub skipped: u64,
    pub publish_failures: u64,
    pub consume_errors: u64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> BridgeCounters {
        BridgeCounters {
            received: self.received.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            consume_errors: self.consume_errors.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// A configured, not yet started bridge.
pub struct Bridge {
    bus: Arc<dyn MessageBus>,
    pipeline: Arc<RenderPipeline>,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        pipeline: Arc<RenderPipeline>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            bus,
            pipeline,
            settings,
        }
    }

    /// Subscribe and spawn the consume loop.
    ///
    /// Subscription failures are returned here; once running, per-envelope
    /// errors never stop the loop.
    pub async fn start(self, shutdown: broadcast::Receiver<()>) -> Result<BridgeHandle, BusError> {
        let subscription = self
            .bus
            .subscribe(&self.settings.request_topic, &self.settings.consumer_group)
            .await?;

        let (state, _) = watch::channel(BridgeState::Running);
        let state = Arc::new(state);
        let stats = Arc::new(BridgeStats::default());

        tracing::info!(
            request_topic = %self.settings.request_topic,
            response_topic = %self.settings.response_topic,
            group = %self.settings.consumer_group,
            workers = self.settings.workers,
            "Bridge running"
        );

        let worker = Arc::new(EnvelopeWorker {
            bus: self.bus,
            pipeline: self.pipeline,
            settings: self.settings,
            stats: Arc::clone(&stats),
        });
        let task = tokio::spawn(consume(worker, subscription, shutdown, Arc::clone(&state)));

        Ok(BridgeHandle { state, stats, task })
    }
}

/// Control handle for a started bridge.
pub struct BridgeHandle {
    state: Arc<watch::Sender<BridgeState>>,
    stats: Arc<BridgeStats>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Mark the bridge as draining; the loop exits at the next envelope
    /// boundary once the shutdown signal arrives.
    pub fn begin_drain(&self) {
        set_draining(&self.state);
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    /// Wait for the consume loop to finish.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.task).await
    }

    /// Stop the loop immediately, abandoning in-flight work.
    pub fn abort(&self) {
        self.task.abort();
        self.state.send_replace(BridgeState::Stopped);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn set_draining(state: &watch::Sender<BridgeState>) {
    state.send_if_modified(|s| {
        if *s == BridgeState::Running {
            *s = BridgeState::Draining;
            true
        } else {
            false
        }
    });
}

async fn consume(
    worker: Arc<EnvelopeWorker>,
    mut subscription: Box<dyn Subscription>,
    mut shutdown: broadcast::Receiver<()>,
    state: Arc<watch::Sender<BridgeState>>,
) {
    if worker.settings.workers <= 1 {
        consume_serial(&worker, subscription.as_mut(), &mut shutdown).await;
    } else {
        consume_pooled(&worker, subscription.as_mut(), &mut shutdown).await;
    }

    set_draining(&state);
    state.send_replace(BridgeState::Stopped);
    tracing::info!(stats = ?worker.stats.snapshot(), "Bridge stopped");
}

async fn consume_serial(
    worker: &EnvelopeWorker,
    subscription: &mut dyn Subscription,
    shutdown: &mut broadcast::Receiver<()>,
) {
    while let Some(message) = next_envelope(worker, subscription, shutdown).await {
        worker.handle(message).await;
    }
}

async fn consume_pooled(
    worker: &Arc<EnvelopeWorker>,
    subscription: &mut dyn Subscription,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let (tx, rx) = mpsc::channel::<BusMessage>(worker.settings.queue_capacity);
    let rx = Arc::new(Mutex::new(rx));

    let mut pool = JoinSet::new();
    for _ in 0..worker.settings.workers {
        let worker = Arc::clone(worker);
        let rx = Arc::clone(&rx);
        pool.spawn(async move {
            loop {
                let next = rx.lock().await.recv().await;
                match next {
                    Some(message) => worker.handle(message).await,
                    None => break,
                }
            }
        });
    }

    while let Some(message) = next_envelope(worker, subscription, shutdown).await {
        if tx.send(message).await.is_err() {
            tracing::error!("Render workers exited early");
            break;
        }
    }

    // Closing the queue lets workers finish what was already accepted.
    drop(tx);
    while let Some(result) = pool.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Render worker failed");
        }
    }
}

/// Next message to process, or `None` when the loop should stop.
async fn next_envelope(
    worker: &EnvelopeWorker,
    subscription: &mut dyn Subscription,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<BusMessage> {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::info!("Bridge draining");
                return None;
            }
            next = subscription.next_message() => next,
        };

        match next {
            Ok(Some(message)) => return Some(message),
            Ok(None) => {
                tracing::info!("Bus closed; bridge stopping");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read from request topic");
                metrics::record_consume_error();
                bump(&worker.stats.consume_errors);

                tokio::select! {
                    biased;
                    _ = shutdown.recv() => return None,
                    _ = tokio::time::sleep(CONSUME_ERROR_PAUSE) => {}
                }
            }
        }
    }
}

struct EnvelopeWorker {
    bus: Arc<dyn MessageBus>,
    pipeline: Arc<RenderPipeline>,
    settings: BridgeSettings,
    stats: Arc<BridgeStats>,
}

impl EnvelopeWorker {
    async fn handle(&self, message: BusMessage) {
        bump(&self.stats.received);

        let request = match RequestEnvelope::decode(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                match e.request_id() {
                    Some(id) => {
                        tracing::warn!(request_id = id, error = %e, "Malformed request envelope");
                        bump(&self.stats.malformed);
                        metrics::record_envelope("malformed");
                        let reply = ResponseEnvelope::failed(id, STATUS_BAD_REQUEST, MALFORMED_REASON);
                        self.publish(reply).await;
                    }
                    None => {
                        tracing::warn!(key = ?message.key, error = %e, "Skipping undecodable message");
                        bump(&self.stats.skipped);
                        metrics::record_envelope("skipped");
                    }
                }
                return;
            }
        };

        tracing::debug!(request_id = %request.id, path = %request.path, "Envelope received");

        let render_timeout = self.pipeline.store().config().timeouts.render();
        let started = Instant::now();
        let rendered = self
            .pipeline
            .render_bounded(request.path.clone(), request.body_bytes(), render_timeout)
            .await;

        let reply = match rendered {
            Ok(result) => {
                metrics::record_render("bus", "ok", started);
                ResponseEnvelope::rendered(request.id.as_str(), &result)
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %request.id,
                    path = %request.path,
                    error = %err,
                    cause = ?std::error::Error::source(&err),
                    "Render failed"
                );
                metrics::record_render("bus", "error", started);
                bump(&self.stats.render_failures);
                ResponseEnvelope::render_failed(request.id.as_str(), &err)
            }
        };

        self.publish(reply).await;
    }

    async fn publish(&self, reply: ResponseEnvelope) {
        let outcome = if reply.is_success() { "rendered" } else { "failed" };
        let request_id = reply.request_id.clone();

        let payload = match reply.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Failed to encode response");
                self.publish_failed("encode");
                return;
            }
        };

        let message = BusMessage::new(request_id.as_str(), payload);
        let topic = self.settings.response_topic.as_str();
        let limit = self.pipeline.store().config().timeouts.publish();
        match with_timeout("publish", limit, self.bus.publish(topic, message)).await {
            Ok(Ok(())) => {
                bump(&self.stats.replied);
                metrics::record_envelope(outcome);
                tracing::debug!(request_id = %request_id, status = reply.status, "Response published");
            }
            Ok(Err(e)) => {
                tracing::error!(request_id = %request_id, error = %e, "Failed to publish response");
                self.publish_failed("bus");
            }
            Err(elapsed) => {
                tracing::error!(request_id = %request_id, error = %elapsed, "Failed to publish response");
                self.publish_failed("timeout");
            }
        }
    }

    fn publish_failed(&self, reason: &'static str) {
        bump(&self.stats.publish_failures);
        metrics::record_publish_failure(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::config::ConfigStore;
    use crate::render::MiniJinjaRenderer;

    fn pipeline() -> Arc<RenderPipeline> {
        let engine = MiniJinjaRenderer::from_sources([
            ("about.tmpl", "<h1>About</h1>"),
            ("default.tmpl", "<h1>Default</h1>"),
        ])
        .unwrap();
        let store = Arc::new(ConfigStore::new(ServerConfig::default()));
        Arc::new(RenderPipeline::new(store, Arc::new(engine)))
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = ServerConfig::default();
        config.bridge.workers = 0;
        let settings = BridgeSettings::from_config(&config);
        assert_eq!(settings.request_topic, "ssr-requests");
        assert_eq!(settings.response_topic, "ssr-responses");
        assert_eq!(settings.consumer_group, "ssr-server");
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.queue_capacity, config.bridge.queue_capacity.max(1));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let bus = Arc::new(InMemoryBus::new());
        let settings = BridgeSettings::from_config(&ServerConfig::default());
        let (tx, rx) = broadcast::channel(1);

        let mut handle = Bridge::new(bus, pipeline(), settings).start(rx).await.unwrap();
        assert_eq!(handle.state(), BridgeState::Running);

        handle.begin_drain();
        assert_eq!(handle.state(), BridgeState::Draining);

        tx.send(()).unwrap();
        handle.join().await.unwrap();
        assert_eq!(handle.state(), BridgeState::Stopped);
    }

    #[tokio::test]
    async fn test_start_fails_on_closed_bus() {
        let bus = InMemoryBus::new();
        bus.close().await.unwrap();
        let settings = BridgeSettings::from_config(&ServerConfig::default());
        let (_tx, rx) = broadcast::channel(1);

        let result = Bridge::new(Arc::new(bus), pipeline(), settings).start(rx).await;
        assert!(matches!(result, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn test_bus_close_stops_loop() {
        let bus = Arc::new(InMemoryBus::new());
        let settings = BridgeSettings::from_config(&ServerConfig::default());
        let (_tx, rx) = broadcast::channel(1);

        let mut handle = Bridge::new(bus.clone(), pipeline(), settings)
            .start(rx)
            .await
            .unwrap();
        bus.close().await.unwrap();
        handle.join().await.unwrap();
        assert_eq!(handle.state(), BridgeState::Stopped);
    }
}
