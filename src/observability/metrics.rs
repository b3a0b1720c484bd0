//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ssr_renders_total` (counter): renders by transport, outcome
//! - `ssr_render_duration_seconds` (histogram): render latency by transport
//! - `ssr_bridge_envelopes_total` (counter): envelopes handled by outcome
//! - `ssr_bridge_publish_failures_total` (counter): undelivered responses by reason
//! - `ssr_bridge_consume_errors_total` (counter): inbound read failures
//! - `ssr_config_reloads_total` (counter): reload attempts by result
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter only when an address is configured

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one render attempt.
pub fn record_render(transport: &'static str, outcome: &'static str, started: Instant) {
    counter!("ssr_renders_total", "transport" => transport, "outcome" => outcome).increment(1);
    histogram!("ssr_render_duration_seconds", "transport" => transport)
        .record(started.elapsed().as_secs_f64());
}

/// Record how the bridge disposed of one inbound message.
pub fn record_envelope(outcome: &'static str) {
    counter!("ssr_bridge_envelopes_total", "outcome" => outcome).increment(1);
}

pub fn record_publish_failure(reason: &'static str) {
    counter!("ssr_bridge_publish_failures_total", "reason" => reason).increment(1);
}

pub fn record_consume_error() {
    counter!("ssr_bridge_consume_errors_total").increment(1);
}

pub fn record_config_reload(success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!("ssr_config_reloads_total", "result" => result).increment(1);
}
