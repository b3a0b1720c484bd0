//! SSR gateway.
//!
//! Renders pages over two transports that share one route table and render
//! pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!     HTTP request                          Bus request envelope
//!     ────────────┐                         ┌──────────── request topic
//!                 ▼                         ▼
//!           ┌──────────┐              ┌──────────┐
//!           │   http   │              │   bus    │
//!           │  server  │              │  bridge  │
//!           └────┬─────┘              └────┬─────┘
//!                │                         │
//!                ▼                         ▼
//!           ┌─────────────────────────────────────┐
//!           │  routing (route table, fallback)    │
//!           │  render  (context → engine → state) │
//!           └─────────────────────────────────────┘
//!                │                         │
//!     markup or  ▼                         ▼  correlated response envelope
//!     {html,state}                         └──────────▶ response topic
//!
//!     Cross-cutting: config (ArcSwap store, reload) · lifecycle (start,
//!     drain under deadline) · observability · resilience (timeouts)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use ssr_gateway::config::{load_config, ConfigWatcher, ServerConfig};
use ssr_gateway::lifecycle::SignalListener;
use ssr_gateway::observability::{logging, metrics};
use ssr_gateway::Server;

#[derive(Parser)]
#[command(name = "ssr-gateway", version)]
#[command(about = "Server-side render gateway with HTTP and message-bus transports", long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, env = "SSR_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Message bus endpoint, e.g. memory://local
    #[arg(long)]
    bus: Option<String>,

    /// Templates directory
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Static assets directory
    #[arg(long = "static")]
    static_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Runtime environment (development, production)
    #[arg(long)]
    env: Option<String>,

    /// Reload the configuration file when it changes
    #[arg(long)]
    watch_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bus) = &self.bus {
            config.bus_endpoint = bus.clone();
        }
        if let Some(dir) = &self.templates {
            config.templates_dir = dir.clone();
        }
        if let Some(dir) = &self.static_dir {
            config.static_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(env) = &self.env {
            config.environment = env.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.log_level, config.is_production())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ssr-gateway starting");

    if let Some(addr) = &config.observability.metrics_address {
        metrics::init_metrics(addr.parse()?)?;
    }

    tracing::info!(
        port = config.port,
        bus_endpoint = %config.bus_endpoint,
        templates_dir = %config.templates_dir.display(),
        environment = %config.environment,
        "Configuration loaded"
    );

    let port = config.port;
    let shutdown_deadline = config.timeouts.shutdown();
    let server = Server::from_config(config, cli.config.clone())?;

    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = server.start(listener).await?;
    tracing::info!(address = %addr, "Listening for connections");

    // Kept alive until shutdown.
    let _watcher = match (&cli.config, cli.watch_config) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let store = Arc::clone(server.store());
            tokio::spawn(async move {
                while let Some(config) = updates.recv().await {
                    store.replace(config);
                    metrics::record_config_reload(true);
                }
            });
            Some(watcher)
        }
        (None, true) => {
            tracing::warn!("--watch-config ignored without --config");
            None
        }
        _ => None,
    };

    let mut signals = SignalListener::install()?;
    loop {
        let signal = signals.recv().await?;
        if signal.is_shutdown() {
            tracing::info!(signal = ?signal, "Shutdown signal received");
            break;
        }
        tracing::info!(signal = ?signal, "Reload signal received");
        if let Err(e) = server.reload() {
            tracing::warn!(error = %e, "Reload failed");
        }
    }

    if let Err(e) = server.shutdown(shutdown_deadline).await {
        tracing::warn!(error = %e, "Graceful shutdown incomplete");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
