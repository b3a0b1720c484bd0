//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from TOML or JSON files.
//! Keys are snake_case; the camelCase spellings used by JSON front-ends
//! (`busEndpoint`, `templatesDir`, ...) are accepted as aliases.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Root configuration for the render server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen port (0 picks an ephemeral port).
    #[serde(deserialize_with = "de_port")]
    pub port: u16,

    /// Message bus endpoint (e.g. "memory://local").
    #[serde(alias = "busEndpoint", alias = "kafkaURL", alias = "kafka_url")]
    pub bus_endpoint: String,

    /// Directory holding the page templates.
    #[serde(alias = "templatesDir")]
    pub templates_dir: PathBuf,

    /// Directory served under `/static`.
    #[serde(alias = "staticDir")]
    pub static_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[serde(alias = "logLevel")]
    pub log_level: String,

    /// Runtime environment ("development" or "production").
    pub environment: String,

    /// Render target used when no route matches.
    #[serde(alias = "fallbackTarget")]
    pub fallback_target: String,

    /// Reserved HTTP prefix answered by the liveness/echo handler.
    #[serde(alias = "apiPrefix")]
    pub api_prefix: String,

    /// Ordered route pattern → render target mapping.
    pub routes: RouteMap,

    /// Ordered API path → handler name mapping.
    #[serde(alias = "apiEndpoints")]
    pub api_endpoints: RouteMap,

    /// Message-bus bridge settings.
    pub bridge: BridgeConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bus_endpoint: "memory://local".to_string(),
            templates_dir: PathBuf::from("./templates"),
            static_dir: PathBuf::from("./static"),
            log_level: "info".to_string(),
            environment: "development".to_string(),
            fallback_target: "default.tmpl".to_string(),
            api_prefix: "/api".to_string(),
            routes: RouteMap::from_pairs([
                ("/", "index.tmpl"),
                ("/about", "about.tmpl"),
                ("/products", "products.tmpl"),
                ("/products/:id", "product-detail.tmpl"),
            ]),
            api_endpoints: RouteMap::from_pairs([
                ("/api/products", "getProducts"),
                ("/api/products/:id", "getProductById"),
            ]),
            bridge: BridgeConfig::default(),
            timeouts: TimeoutConfig::default(),
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Replace empty values with built-in defaults.
    ///
    /// Serde defaults only cover missing keys; a document that spells out an
    /// empty string or an empty route table gets the default as well.
    pub fn fill_defaults(&mut self) {
        let defaults = Self::default();

        fill_string(&mut self.bus_endpoint, &defaults.bus_endpoint);
        fill_string(&mut self.log_level, &defaults.log_level);
        fill_string(&mut self.environment, &defaults.environment);
        fill_string(&mut self.fallback_target, &defaults.fallback_target);
        fill_string(&mut self.api_prefix, &defaults.api_prefix);
        if self.templates_dir.as_os_str().is_empty() {
            self.templates_dir = defaults.templates_dir;
        }
        if self.static_dir.as_os_str().is_empty() {
            self.static_dir = defaults.static_dir;
        }
        if self.routes.is_empty() {
            self.routes = defaults.routes;
        }
        if self.api_endpoints.is_empty() {
            self.api_endpoints = defaults.api_endpoints;
        }

        let bridge_defaults = BridgeConfig::default();
        fill_string(&mut self.bridge.request_topic, &bridge_defaults.request_topic);
        fill_string(&mut self.bridge.response_topic, &bridge_defaults.response_topic);
        fill_string(&mut self.bridge.consumer_group, &bridge_defaults.consumer_group);
    }

    /// Returns true when running in the production environment.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn fill_string(value: &mut String, default: &str) {
    if value.trim().is_empty() {
        *value = default.to_string();
    }
}

/// Message-bus bridge configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Start the bridge alongside the HTTP listener.
    pub enabled: bool,

    /// Topic carrying request envelopes.
    #[serde(alias = "requestTopic")]
    pub request_topic: String,

    /// Topic receiving response envelopes.
    #[serde(alias = "responseTopic")]
    pub response_topic: String,

    /// Consumer group the bridge subscribes under.
    #[serde(alias = "consumerGroup")]
    pub consumer_group: String,

    /// Render workers. 1 processes envelopes serially and preserves reply order.
    pub workers: usize,

    /// Envelopes buffered between the consumer and the workers (workers > 1).
    #[serde(alias = "queueCapacity")]
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_topic: "ssr-requests".to_string(),
            response_topic: "ssr-responses".to_string(),
            consumer_group: "ssr-server".to_string(),
            workers: 1,
            queue_capacity: 64,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for a single render in milliseconds.
    pub render_ms: u64,

    /// Upper bound for a single bus publish in milliseconds.
    pub publish_ms: u64,

    /// Total time for an HTTP request/response in seconds.
    pub request_secs: u64,

    /// Default drain deadline used on process shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            render_ms: 5_000,
            publish_ms: 10_000,
            request_secs: 30,
            shutdown_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn render(&self) -> Duration {
        Duration::from_millis(self.render_ms)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_millis(self.publish_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

/// Request limits.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum HTTP request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Prometheus scrape endpoint bind address; disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_address: Option<String>,
}

/// Ordered `pattern → value` pairs.
///
/// Serialized as a map. Deserialization keeps document order, which is the
/// tie-break between ambiguous patterns. A list of `{ path, target }` tables
/// is accepted as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMap(Vec<(String, String)>);

impl RouteMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Append an entry, keeping declaration order.
    pub fn push(&mut self, pattern: impl Into<String>, value: impl Into<String>) {
        self.0.push((pattern.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for RouteMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (pattern, value) in &self.0 {
            map.serialize_entry(pattern, value)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RouteEntry {
    #[serde(alias = "pattern")]
    path: String,
    #[serde(alias = "handler", alias = "template")]
    target: String,
}

struct RouteMapVisitor;

impl<'de> Visitor<'de> for RouteMapVisitor {
    type Value = RouteMap;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of path patterns to targets, or a list of { path, target } entries")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RouteMap, A::Error> {
        let mut routes = RouteMap::new();
        while let Some((pattern, value)) = access.next_entry::<String, String>()? {
            routes.push(pattern, value);
        }
        Ok(routes)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<RouteMap, A::Error> {
        let mut routes = RouteMap::new();
        while let Some(entry) = access.next_element::<RouteEntry>()? {
            routes.push(entry.path, entry.target);
        }
        Ok(routes)
    }
}

impl<'de> Deserialize<'de> for RouteMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RouteMapVisitor)
    }
}

/// Accepts the port as a number or as a string ("3000"); an empty string
/// means "use the default".
fn de_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) if text.trim().is_empty() => Ok(ServerConfig::default().port),
        PortRepr::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port '{}'", text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.fallback_target, "default.tmpl");
        assert_eq!(config.routes.len(), 4);
        assert_eq!(config.bridge.workers, 1);
        assert_eq!(config.timeouts.shutdown(), Duration::from_secs(10));
        assert!(!config.is_production());
    }

    #[test]
    fn test_route_map_keeps_toml_order() {
        let config: ServerConfig = toml::from_str(
            r#"
            [routes]
            "/z/:a" = "z.tmpl"
            "/a/:b" = "a.tmpl"
            "/m" = "m.tmpl"
            "#,
        )
        .unwrap();
        let patterns: Vec<_> = config.routes.iter().map(|(p, _)| p).collect();
        assert_eq!(patterns, vec!["/z/:a", "/a/:b", "/m"]);
    }

    #[test]
    fn test_route_map_keeps_json_order() {
        let config: ServerConfig = serde_json::from_str(
            r#"{ "routes": { "/z/:a": "z.tmpl", "/a/:b": "a.tmpl" } }"#,
        )
        .unwrap();
        let patterns: Vec<_> = config.routes.iter().map(|(p, _)| p).collect();
        assert_eq!(patterns, vec!["/z/:a", "/a/:b"]);
    }

    #[test]
    fn test_route_list_form() {
        let config: ServerConfig = toml::from_str(
            r#"
            [[routes]]
            path = "/docs/:page"
            target = "doc.tmpl"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.routes.iter().collect::<Vec<_>>(),
            vec![("/docs/:page", "doc.tmpl")]
        );
    }

    #[test]
    fn test_camel_case_aliases_and_string_port() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "port": "8088",
                "kafkaURL": "memory://alt",
                "templatesDir": "/srv/templates",
                "apiEndpoints": { "/api/ping": "ping" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.bus_endpoint, "memory://alt");
        assert_eq!(config.templates_dir, PathBuf::from("/srv/templates"));
        assert_eq!(config.api_endpoints.len(), 1);
    }

    #[test]
    fn test_fill_defaults_replaces_empty_values() {
        let mut config: ServerConfig = serde_json::from_str(
            r#"{ "port": "", "logLevel": "", "routes": {}, "environment": "production" }"#,
        )
        .unwrap();
        config.fill_defaults();
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.routes, ServerConfig::default().routes);
        assert!(config.is_production());
    }
}
