//! Path + payload → markup + state.
//!
//! # Responsibilities
//! - Resolve the path against the current route table snapshot
//! - Build the render context (payload, then `path`, then route params)
//! - Invoke the engine and wrap its output with a state snapshot
//!
//! # Design Decisions
//! - No per-call mutable state; one pipeline is shared by every transport
//! - Engine failures never yield partial markup
//! - `render_bounded` moves the engine call onto the blocking pool so a slow
//!   template cannot stall the async workers

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::config::ConfigStore;
use crate::render::context::{RenderContext, RenderResult, RenderState};
use crate::render::engine::{EngineError, PageRenderer};
use crate::resilience::with_timeout;

/// A render could not produce markup.
///
/// The display text is the short reason shown to callers; causes are only
/// reachable through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid context payload")]
    InvalidContext(#[source] serde_json::Error),

    #[error("render engine failure")]
    Engine {
        target: String,
        #[source]
        cause: EngineError,
    },

    #[error("render timed out")]
    TimedOut(Duration),

    #[error("render aborted")]
    Aborted,
}

impl RenderError {
    /// Short caller-facing reason.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Shared render entry point for both transports.
pub struct RenderPipeline {
    store: Arc<ConfigStore>,
    engine: Arc<dyn PageRenderer>,
}

impl RenderPipeline {
    pub fn new(store: Arc<ConfigStore>, engine: Arc<dyn PageRenderer>) -> Self {
        Self { store, engine }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Render `path` with an optional raw JSON context payload.
    pub fn render(&self, path: &str, raw: Option<&[u8]>) -> Result<RenderResult, RenderError> {
        let routes = self.store.routes();
        let resolved = routes.resolve(path);

        let data = RenderContext::decode(raw)
            .map_err(RenderError::InvalidContext)?
            .with_route(path, resolved.params);

        let markup = self
            .engine
            .render(resolved.target, &data)
            .map_err(|cause| RenderError::Engine {
                target: resolved.target.to_string(),
                cause,
            })?;

        tracing::debug!(path, target = resolved.target, kind = ?resolved.kind, "Rendered");

        Ok(RenderResult {
            markup,
            target: resolved.target.to_string(),
            state: RenderState {
                rendered: true,
                path: path.to_string(),
                data,
            },
        })
    }

    /// Render on the blocking pool, giving up after `limit`.
    ///
    /// On timeout the engine call is left to finish in the background and its
    /// output is discarded.
    pub async fn render_bounded(
        self: &Arc<Self>,
        path: String,
        raw: Option<Bytes>,
        limit: Duration,
    ) -> Result<RenderResult, RenderError> {
        let pipeline = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || pipeline.render(&path, raw.as_deref()));

        match with_timeout("render", limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Render task failed");
                Err(RenderError::Aborted)
            }
            Err(elapsed) => Err(RenderError::TimedOut(elapsed.limit)),
        }
    }
}
