//! Response shaping.
//!
//! # Responsibilities
//! - Turn a render result into markup or the `{html, state}` JSON envelope
//! - Turn a render failure into a 500 with a short text body
//! - Build the API liveness/echo payload
//!
//! # Design Decisions
//! - Error bodies carry only the render error's reason, never its cause
//! - Echo timestamps are RFC 3339 in UTC

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::render::{RenderError, RenderResult};

/// JSON reply for callers that accept `application/json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    pub html: String,
    pub state: Value,
}

impl From<RenderResult> for RenderedPage {
    fn from(result: RenderResult) -> Self {
        let state = result.state_json();
        Self {
            html: result.markup,
            state,
        }
    }
}

/// Reply for a successful render.
pub fn rendered(result: RenderResult, as_json: bool) -> Response {
    if as_json {
        Json(RenderedPage::from(result)).into_response()
    } else {
        Html(result.markup).into_response()
    }
}

/// Reply for a failed render.
pub fn render_failed(err: &RenderError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Render error: {}", err.reason()),
    )
        .into_response()
}

/// Liveness/echo payload served under the API prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEcho {
    pub path: String,
    pub time: String,
    /// Configured handler name when the path matches an API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl ApiEcho {
    pub fn now(path: impl Into<String>, handler: Option<String>) -> Self {
        let time = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            path: path.into(),
            time,
            handler,
        }
    }
}

/// Part of `path` after the API prefix, always starting with `/`.
pub fn api_subpath<'a>(path: &'a str, prefix: &str) -> &'a str {
    match path.strip_prefix(prefix) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => "/",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RenderContext, RenderState};
    use axum::http::header;

    fn result() -> RenderResult {
        RenderResult {
            markup: "<h1>Hi</h1>".to_string(),
            target: "index.tmpl".to_string(),
            state: RenderState {
                rendered: true,
                path: "/".to_string(),
                data: RenderContext::default().with_route("/", Vec::new()),
            },
        }
    }

    #[test]
    fn test_html_reply() {
        let response = rendered(result(), false);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
    }

    #[test]
    fn test_json_reply_content_type() {
        let response = rendered(result(), true);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_render_failed_is_500() {
        let response = render_failed(&RenderError::TimedOut(std::time::Duration::from_secs(1)));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_subpath() {
        assert_eq!(api_subpath("/api/products/7", "/api"), "/products/7");
        assert_eq!(api_subpath("/api/", "/api"), "/");
        assert_eq!(api_subpath("/api", "/api"), "/");
        assert_eq!(api_subpath("/v2/api/x", "/v2/api"), "/x");
    }

    #[test]
    fn test_echo_time_is_rfc3339() {
        let echo = ApiEcho::now("/api/health", None);
        assert!(OffsetDateTime::parse(&echo.time, &Rfc3339).is_ok());
        let value = serde_json::to_value(&echo).unwrap();
        assert!(value.get("handler").is_none());
    }
}
