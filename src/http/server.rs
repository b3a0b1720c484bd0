//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request ID, tracing, body limit, timeout)
//! - Serve the API echo under the reserved prefix and static assets
//! - Send every other path to the render pipeline
//! - Stop accepting on shutdown and let in-flight requests finish

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ConfigStore, ServerConfig};
use crate::http::request::{
    context_payload, make_request_span, propagate_request_id_layer, request_id,
    set_request_id_layer, wants_json,
};
use crate::http::response::{self, ApiEcho};
use crate::observability::metrics;
use crate::render::RenderPipeline;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RenderPipeline>,
    pub store: Arc<ConfigStore>,
    /// API prefix the router was built with.
    pub api_prefix: Arc<str>,
}

impl AppState {
    pub fn new(pipeline: Arc<RenderPipeline>) -> Self {
        let store = Arc::clone(pipeline.store());
        let api_prefix = Arc::from(store.config().api_prefix.trim_end_matches('/'));
        Self {
            pipeline,
            store,
            api_prefix,
        }
    }
}

/// Synchronous render transport.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Build the router from the configuration at startup.
    ///
    /// Route tables are read per request from the store; the API prefix,
    /// static directory, limits and request timeout are fixed here.
    pub fn new(state: AppState) -> Self {
        let config = state.store.config();
        let router = Self::build_router(&config, state);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        let prefix = Arc::clone(&state.api_prefix);

        Router::new()
            .route(&prefix, any(api_handler))
            .route(&format!("{prefix}/"), any(api_handler))
            .route(&format!("{prefix}/{{*path}}"), any(api_handler))
            .nest_service("/static", ServeDir::new(&config.static_dir))
            .fallback(render_handler)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes))
            .layer(TimeoutLayer::new(config.timeouts.request()))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(set_request_id_layer())
    }

    /// Router with all layers, for serving or for driving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain open requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Render any non-API path.
async fn render_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let path = uri.path().to_string();
    let as_json = wants_json(&headers);
    let payload = context_payload(&headers, body);
    let limit = state.store.config().timeouts.render();

    match state.pipeline.render_bounded(path.clone(), payload, limit).await {
        Ok(result) => {
            metrics::record_render("http", "ok", started);
            tracing::debug!(
                request_id = %request_id(&headers),
                path = %path,
                target = %result.target,
                "Page rendered"
            );
            response::rendered(result, as_json)
        }
        Err(err) => {
            metrics::record_render("http", "error", started);
            tracing::warn!(
                request_id = %request_id(&headers),
                path = %path,
                error = %err,
                cause = ?std::error::Error::source(&err),
                "Render failed"
            );
            response::render_failed(&err)
        }
    }
}

/// Liveness/echo under the API prefix.
///
/// Endpoint names are looked up by full path; the echo carries only the part
/// after the prefix.
async fn api_handler(State(state): State<AppState>, uri: Uri) -> impl IntoResponse {
    let path = uri.path();
    let handler = state
        .store
        .api_endpoints()
        .lookup(path)
        .map(|m| m.target.to_string());
    Json(ApiEcho::now(response::api_subpath(path, &state.api_prefix), handler))
}
