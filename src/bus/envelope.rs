//! Wire format for bus messages.
//!
//! Both envelopes are JSON objects with camelCase keys. A request carries the
//! caller's correlation `id`; the response echoes it as `requestId`.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;

use crate::render::{RenderError, RenderResult};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_SERVER_ERROR: u16 = 500;

/// Error text sent back for envelopes that carry an id but cannot be parsed.
pub const MALFORMED_REASON: &str = "malformed request envelope";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// `id` is set when the payload was a JSON object with a usable id, so a
    /// reply can still be addressed.
    #[error("malformed request envelope: {source}")]
    Malformed {
        id: Option<String>,
        #[source]
        source: serde_json::Error,
    },

    #[error("request envelope has an empty id")]
    EmptyId,

    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

impl EnvelopeError {
    /// Correlation id recovered from a rejected payload, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Malformed { id, .. } => id.as_deref(),
            _ => None,
        }
    }
}

/// Render request published by a front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub id: String,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw JSON context payload, kept undecoded until render.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Box<RawValue>>,
    #[serde(default)]
    pub timestamp: i64,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestEnvelope {
    /// A GET request for `path` with a fresh timestamp.
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            timestamp: now_millis(),
        }
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: &Value) -> Result<Self, EnvelopeError> {
        let raw = serde_json::to_string(body).map_err(EnvelopeError::Encode)?;
        self.body = Some(RawValue::from_string(raw).map_err(EnvelopeError::Encode)?);
        Ok(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_slice(payload).map_err(|source| {
            EnvelopeError::Malformed {
                id: salvage_id(payload),
                source,
            }
        })?;
        if envelope.id.is_empty() {
            return Err(EnvelopeError::EmptyId);
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(EnvelopeError::Encode)
    }

    /// Body bytes handed to the render pipeline.
    pub fn body_bytes(&self) -> Option<Bytes> {
        self.body
            .as_ref()
            .map(|raw| Bytes::copy_from_slice(raw.get().as_bytes()))
    }
}

fn salvage_id(payload: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct IdOnly {
        id: String,
    }

    serde_json::from_slice::<IdOnly>(payload)
        .ok()
        .map(|p| p.id)
        .filter(|id| !id.is_empty())
}

/// Render result (or failure) correlated to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: String,
    #[serde(rename = "html", alias = "markup", default)]
    pub markup: String,
    #[serde(default)]
    pub state: Option<Value>,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

impl ResponseEnvelope {
    /// Successful render reply.
    pub fn rendered(request_id: impl Into<String>, result: &RenderResult) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "text/html; charset=utf-8".to_string(),
        );
        Self {
            request_id: request_id.into(),
            markup: result.markup.clone(),
            state: Some(result.state_json()),
            status: STATUS_OK,
            headers,
            error: None,
            timestamp: now_millis(),
        }
    }

    /// Failed render reply carrying the short reason.
    pub fn render_failed(request_id: impl Into<String>, err: &RenderError) -> Self {
        Self::failed(request_id, STATUS_SERVER_ERROR, err.reason())
    }

    pub fn failed(request_id: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            markup: String::new(),
            state: None,
            status,
            headers: BTreeMap::new(),
            error: Some(error.into()),
            timestamp: now_millis(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status < 400
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(payload).map_err(|source| EnvelopeError::Malformed {
            id: salvage_request_id(payload),
            source,
        })
    }

    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(EnvelopeError::Encode)
    }
}

fn salvage_request_id(payload: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct IdOnly {
        #[serde(rename = "requestId")]
        request_id: String,
    }

    serde_json::from_slice::<IdOnly>(payload)
        .ok()
        .map(|p| p.request_id)
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_request_defaults() {
        let req = RequestEnvelope::decode(br#"{"id":"r1","path":"/about","body":{}}"#).unwrap();
        assert_eq!(req.id, "r1");
        assert_eq!(req.method, "GET");
        assert!(req.headers.is_empty());
        assert_eq!(req.body_bytes().as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn test_body_is_kept_raw() {
        let req = RequestEnvelope::decode(
            br#"{"id":"r3","path":"/about","body":"not-json-when-object-expected"}"#,
        )
        .unwrap();
        assert_eq!(
            req.body_bytes().as_deref(),
            Some(&br#""not-json-when-object-expected""#[..])
        );
    }

    #[test]
    fn test_null_body_is_absent() {
        let req = RequestEnvelope::decode(br#"{"id":"a","path":"/","body":null}"#).unwrap();
        assert!(req.body_bytes().is_none());
    }

    #[test]
    fn test_malformed_with_id_is_addressable() {
        let err = RequestEnvelope::decode(br#"{"id":"r9","path":42}"#).unwrap_err();
        assert_eq!(err.request_id(), Some("r9"));
    }

    #[test]
    fn test_malformed_without_id() {
        let payloads: [&[u8]; 3] = [b"not json", br#"{"path":"/"}"#, br#"{"id":7,"path":"/"}"#];
        for payload in payloads {
            let err = RequestEnvelope::decode(payload).unwrap_err();
            assert_eq!(err.request_id(), None);
        }
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = RequestEnvelope::decode(br#"{"id":"","path":"/"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::EmptyId));
    }

    #[test]
    fn test_response_wire_shape() {
        let resp = ResponseEnvelope::failed("r3", STATUS_SERVER_ERROR, "invalid context payload");
        let value: Value = serde_json::from_slice(&resp.encode().unwrap()).unwrap();
        assert_eq!(value["requestId"], json!("r3"));
        assert_eq!(value["html"], json!(""));
        assert_eq!(value["status"], json!(500));
        assert_eq!(value["error"], json!("invalid context payload"));
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_success_omits_error() {
        let resp = ResponseEnvelope {
            request_id: "r1".to_string(),
            markup: "<p/>".to_string(),
            state: Some(json!({"rendered": true})),
            status: STATUS_OK,
            headers: BTreeMap::new(),
            error: None,
            timestamp: 1,
        };
        let value: Value = serde_json::from_slice(&resp.encode().unwrap()).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(ResponseEnvelope::decode(&resp.encode().unwrap()).unwrap(), resp);
    }

    #[test]
    fn test_request_with_body() {
        let req = RequestEnvelope::new("c1", "/products/1")
            .with_body(&json!({"user": "ada"}))
            .unwrap();
        let decoded = RequestEnvelope::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded.path, "/products/1");
        assert_eq!(decoded.body_bytes().as_deref(), Some(&br#"{"user":"ada"}"#[..]));
    }
}
