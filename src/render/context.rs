//! Render inputs and outputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::routing::RouteParams;

/// Merged input data for one render.
///
/// Built once from the caller payload plus derived fields and never mutated
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderContext(Map<String, Value>);

impl RenderContext {
    /// Decode a raw JSON payload.
    ///
    /// Absent, empty or `null` payloads give an empty context; anything that
    /// is not a JSON object is an error.
    pub fn decode(raw: Option<&[u8]>) -> Result<Self, serde_json::Error> {
        let raw = match raw {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => bytes,
            _ => return Ok(Self::default()),
        };

        let data: Option<Map<String, Value>> = serde_json::from_slice(raw)?;
        Ok(Self(data.unwrap_or_default()))
    }

    /// Inject the resolved path and the captured route parameters.
    pub fn with_route(mut self, path: &str, params: RouteParams) -> Self {
        self.0.insert("path".to_string(), Value::String(path.to_string()));
        for (name, value) in params {
            self.0.insert(name, Value::String(value));
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Serializable snapshot returned next to the markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderState {
    pub rendered: bool,
    pub path: String,
    pub data: RenderContext,
}

/// Output of one successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub markup: String,
    pub state: RenderState,
    /// Target the path resolved to.
    pub target: String,
}

impl RenderResult {
    /// State snapshot as a JSON value.
    pub fn state_json(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_absent_and_null() {
        assert!(RenderContext::decode(None).unwrap().is_empty());
        assert!(RenderContext::decode(Some(b"")).unwrap().is_empty());
        assert!(RenderContext::decode(Some(b"  \n")).unwrap().is_empty());
        assert!(RenderContext::decode(Some(b"null")).unwrap().is_empty());
    }

    #[test]
    fn test_decode_object() {
        let ctx = RenderContext::decode(Some(br#"{"user":"ada","n":2}"#)).unwrap();
        assert_eq!(ctx.get("user"), Some(&json!("ada")));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        let payloads: [&[u8]; 4] = [br#""a string""#, b"[1,2]", b"42", b"{"];
        for raw in payloads {
            assert!(RenderContext::decode(Some(raw)).is_err());
        }
    }

    #[test]
    fn test_with_route_injects_path_and_params() {
        let ctx = RenderContext::decode(Some(br#"{"path":"spoofed","q":"x"}"#))
            .unwrap()
            .with_route("/products/7", vec![("id".to_string(), "7".to_string())]);
        assert_eq!(ctx.get("path"), Some(&json!("/products/7")));
        assert_eq!(ctx.get("id"), Some(&json!("7")));
        assert_eq!(ctx.get("q"), Some(&json!("x")));
    }

    #[test]
    fn test_state_json_shape() {
        let result = RenderResult {
            markup: "<p>hi</p>".to_string(),
            state: RenderState {
                rendered: true,
                path: "/".to_string(),
                data: RenderContext::default().with_route("/", Vec::new()),
            },
            target: "index.tmpl".to_string(),
        };
        assert_eq!(
            result.state_json(),
            json!({ "rendered": true, "path": "/", "data": { "path": "/" } })
        );
    }
}
