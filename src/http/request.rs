//! Request handling.
//!
//! # Responsibilities
//! - Assign every request an `x-request-id` (UUID v4) and echo it back
//! - Open a tracing span carrying method, path and request id
//! - Decide the reply format from `Accept`
//! - Pick the render context payload out of the body
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - An incoming `x-request-id` is kept, not replaced
//! - Non-JSON bodies (forms, uploads) are not treated as render context

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request};
use bytes::Bytes;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::Span;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const JSON_MEDIA_TYPE: &str = "application/json";

/// Layer that assigns a request id when the client did not send one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies the request id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// Request id assigned by [`set_request_id_layer`], or `-`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Span opened by the trace layer for each request.
pub fn make_request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id(request.headers()),
    )
}

/// Whether the caller asked for the JSON envelope.
pub fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains(JSON_MEDIA_TYPE))
}

/// Body to use as render context.
///
/// Empty bodies and bodies declared as something other than JSON yield
/// `None`; a body with no content type is assumed to be JSON.
pub fn context_payload(headers: &HeaderMap, body: Bytes) -> Option<Bytes> {
    if body.is_empty() {
        return None;
    }

    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    match declared {
        Some(ct) if !ct.to_ascii_lowercase().contains("json") => {
            tracing::debug!(content_type = ct, "Ignoring non-JSON request body");
            None
        }
        _ => Some(body),
    }
}
