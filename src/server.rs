//! Server lifecycle coordinator.
//!
//! # Responsibilities
//! - Own the configuration store, render pipeline and bus client
//! - Start the bridge and the HTTP listener together
//! - Drain both on shutdown within a caller-supplied deadline
//! - Release the bus connection once both have stopped
//!
//! # Design Decisions
//! - Startup errors are returned to the caller; nothing is left running
//!   when `start` fails
//! - `shutdown` is idempotent and never fails the process: overrunning the
//!   deadline aborts the stragglers and is reported as an error value

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::bus::{self, Bridge, BridgeCounters, BridgeHandle, BridgeSettings, BridgeState, BridgeStats, BusError, MessageBus};
use crate::config::{validate_config, ConfigError, ConfigStore, ServerConfig};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::{Shutdown, ShutdownTimeoutError};
use crate::render::{EngineError, MiniJinjaRenderer, PageRenderer, RenderPipeline};
use crate::resilience::with_timeout;

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load templates: {0}")]
    Engine(#[from] EngineError),

    #[error("message bus unavailable: {0}")]
    Bus(#[from] BusError),

    #[error("listener error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server already started")]
    AlreadyStarted,

    #[error("server has been shut down")]
    ShutDown,
}

enum Phase {
    Idle,
    Running(RunningTasks),
    Stopped,
}

struct RunningTasks {
    http: JoinHandle<Result<(), std::io::Error>>,
    bridge: Option<BridgeHandle>,
}

/// One per process: owns both transports and their shared state.
pub struct Server {
    store: Arc<ConfigStore>,
    pipeline: Arc<RenderPipeline>,
    bus: Arc<dyn MessageBus>,
    shutdown: Shutdown,
    phase: Mutex<Phase>,
    local_addr: OnceLock<SocketAddr>,
    bridge_state: OnceLock<watch::Receiver<BridgeState>>,
    bridge_stats: OnceLock<Arc<BridgeStats>>,
}

impl Server {
    /// Build a server from a resolved configuration: load templates from
    /// `templates_dir` and connect to `bus_endpoint`.
    ///
    /// `source` is the file [`Server::reload`] re-reads.
    pub fn from_config(config: ServerConfig, source: Option<PathBuf>) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let engine = MiniJinjaRenderer::from_dir(&config.templates_dir)?;
        let bus = bus::connect(&config.bus_endpoint)?;

        let mut store = ConfigStore::new(config);
        if let Some(path) = source {
            store = store.with_source(path);
        }

        Ok(Self::with_components(Arc::new(store), Arc::new(engine), bus))
    }

    /// Build a server from already constructed parts.
    pub fn with_components(
        store: Arc<ConfigStore>,
        engine: Arc<dyn PageRenderer>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let pipeline = Arc::new(RenderPipeline::new(Arc::clone(&store), engine));
        Self {
            store,
            pipeline,
            bus,
            shutdown: Shutdown::new(),
            phase: Mutex::new(Phase::Idle),
            local_addr: OnceLock::new(),
            bridge_state: OnceLock::new(),
            bridge_stats: OnceLock::new(),
        }
    }

    /// Launch the bridge (when enabled) and serve HTTP on `listener`.
    ///
    /// Returns the address the listener is bound to.
    pub async fn start(&self, listener: TcpListener) -> Result<SocketAddr, StartupError> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Idle => {}
            Phase::Running(_) => return Err(StartupError::AlreadyStarted),
            Phase::Stopped => return Err(StartupError::ShutDown),
        }

        let local_addr = listener.local_addr()?;
        let config = self.store.config();

        let bridge = if config.bridge.enabled {
            let settings = BridgeSettings::from_config(&config);
            let handle = Bridge::new(Arc::clone(&self.bus), Arc::clone(&self.pipeline), settings)
                .start(self.shutdown.subscribe())
                .await?;
            let _ = self.bridge_state.set(handle.watch_state());
            let _ = self.bridge_stats.set(handle.stats());
            Some(handle)
        } else {
            tracing::info!("Bridge disabled");
            None
        };

        let http = HttpServer::new(AppState::new(Arc::clone(&self.pipeline)));
        let http = tokio::spawn(http.run(listener, self.shutdown.subscribe()));

        let _ = self.local_addr.set(local_addr);
        *phase = Phase::Running(RunningTasks { http, bridge });

        tracing::info!(
            address = %local_addr,
            environment = %config.environment,
            routes = config.routes.len(),
            "Server started"
        );
        Ok(local_addr)
    }

    /// Stop both transports, waiting at most `deadline` for in-flight work.
    ///
    /// Safe to call more than once and before `start`; later calls return
    /// `Ok(())` immediately.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ShutdownTimeoutError> {
        let mut phase = self.phase.lock().await;
        let tasks = match std::mem::replace(&mut *phase, Phase::Stopped) {
            Phase::Running(tasks) => Some(tasks),
            Phase::Idle => None,
            Phase::Stopped => return Ok(()),
        };

        tracing::info!(deadline = ?deadline, "Shutting down");
        let until = Instant::now() + deadline;
        let mut pending = Vec::new();

        if let Some(RunningTasks { mut http, mut bridge }) = tasks {
            if let Some(bridge) = &bridge {
                bridge.begin_drain();
            }
            self.shutdown.trigger();

            match with_timeout("http drain", remaining(until), &mut http).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server exited with error"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
                Err(elapsed) => {
                    tracing::warn!(error = %elapsed, "HTTP server did not drain in time");
                    http.abort();
                    pending.push("http");
                }
            }

            if let Some(bridge) = bridge.as_mut() {
                match with_timeout("bridge drain", remaining(until), bridge.join()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!(error = %e, "Bridge task failed"),
                    Err(elapsed) => {
                        tracing::warn!(error = %elapsed, "Bridge did not drain in time");
                        bridge.abort();
                        pending.push("bridge");
                    }
                }
            }
        }

        if let Err(e) = self.bus.close().await {
            tracing::warn!(error = %e, "Failed to close bus connection");
        }

        if pending.is_empty() {
            tracing::info!("Shutdown complete");
            Ok(())
        } else {
            Err(ShutdownTimeoutError { deadline, pending })
        }
    }

    /// Re-read the configuration source and swap in the new route tables.
    pub fn reload(&self) -> Result<(), ConfigError> {
        self.store.reload()
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<RenderPipeline> {
        &self.pipeline
    }

    /// Address of the HTTP listener once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Current bridge state; `Stopped` if it never started.
    pub fn bridge_state(&self) -> BridgeState {
        self.bridge_state
            .get()
            .map_or(BridgeState::Stopped, |rx| *rx.borrow())
    }

    /// Bridge counters, once the bridge has started.
    pub fn bridge_stats(&self) -> Option<BridgeCounters> {
        self.bridge_stats.get().map(|stats| stats.snapshot())
    }
}

fn remaining(until: Instant) -> Duration {
    until.saturating_duration_since(Instant::now())
}
