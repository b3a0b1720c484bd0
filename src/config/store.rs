//! Live configuration shared by every request.
//!
//! The store owns the current [`ServerConfig`] together with the route tables
//! compiled from it. Readers load a snapshot per call; a reload compiles the
//! new tables first and then swaps each pointer, so no reader ever sees a
//! partially-built table.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::ServerConfig;
use crate::observability::metrics;
use crate::routing::RouteTable;

/// Atomically swappable configuration and route tables.
pub struct ConfigStore {
    source: Option<PathBuf>,
    config: ArcSwap<ServerConfig>,
    routes: ArcSwap<RouteTable>,
    api_endpoints: ArcSwap<RouteTable>,
}

impl ConfigStore {
    /// Create a store from an already validated configuration.
    pub fn new(config: ServerConfig) -> Self {
        let (routes, api_endpoints) = compile(&config);
        Self {
            source: None,
            config: ArcSwap::from_pointee(config),
            routes: ArcSwap::from_pointee(routes),
            api_endpoints: ArcSwap::from_pointee(api_endpoints),
        }
    }

    /// Remember the file `reload` should read from.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// Load the initial configuration from `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(load_config(path)?).with_source(path))
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    /// Current render route table.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.load_full()
    }

    /// Current API endpoint table (fallback unused).
    pub fn api_endpoints(&self) -> Arc<RouteTable> {
        self.api_endpoints.load_full()
    }

    /// Replace the live configuration.
    ///
    /// Listener port, bus endpoint, bridge settings, template and static
    /// directories, the API prefix, the HTTP request timeout and the body
    /// limit are bound at startup; changes to them are logged and take effect
    /// on restart. Render and publish timeouts apply to the next request.
    pub fn replace(&self, config: ServerConfig) {
        let current = self.config.load();
        for (field, changed) in [
            ("port", current.port != config.port),
            ("bus_endpoint", current.bus_endpoint != config.bus_endpoint),
            ("templates_dir", current.templates_dir != config.templates_dir),
            ("static_dir", current.static_dir != config.static_dir),
            ("api_prefix", current.api_prefix != config.api_prefix),
            ("bridge", current.bridge != config.bridge),
            (
                "timeouts.request_secs",
                current.timeouts.request_secs != config.timeouts.request_secs,
            ),
            ("limits", current.limits != config.limits),
        ] {
            if changed {
                tracing::warn!(field, "Configuration change requires a restart to take effect");
            }
        }

        let (routes, api_endpoints) = compile(&config);
        let route_count = routes.len();
        self.routes.store(Arc::new(routes));
        self.api_endpoints.store(Arc::new(api_endpoints));
        self.config.store(Arc::new(config));

        tracing::info!(routes = route_count, "Configuration applied");
    }

    /// Re-read the source file and swap in the result.
    ///
    /// On error the current configuration stays in place.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = self.source.as_deref().ok_or(ConfigError::NoSource)?;
        match load_config(path) {
            Ok(config) => {
                self.replace(config);
                metrics::record_config_reload(true);
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Failed to reload config. Keeping current configuration.");
                metrics::record_config_reload(false);
                Err(e)
            }
        }
    }
}

fn compile(config: &ServerConfig) -> (RouteTable, RouteTable) {
    let routes = RouteTable::new(config.routes.iter(), config.fallback_target.as_str());
    let api_endpoints = RouteTable::new(config.api_endpoints.iter(), "");
    (routes, api_endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteMap;
    use std::fs;

    #[test]
    fn test_replace_swaps_tables() {
        let store = ConfigStore::new(ServerConfig::default());
        assert_eq!(store.routes().resolve("/about").target, "about.tmpl");

        let before = store.routes();

        let mut next = ServerConfig::default();
        next.routes = RouteMap::from_pairs([("/about", "about-v2.tmpl")]);
        next.fallback_target = "missing.tmpl".to_string();
        store.replace(next);

        // Snapshots taken earlier are unaffected.
        assert_eq!(before.resolve("/about").target, "about.tmpl");
        assert_eq!(store.routes().resolve("/about").target, "about-v2.tmpl");
        assert_eq!(store.routes().resolve("/").target, "missing.tmpl");
    }

    #[test]
    fn test_api_endpoint_lookup() {
        let store = ConfigStore::new(ServerConfig::default());
        let table = store.api_endpoints();
        assert_eq!(table.lookup("/api/products/7").unwrap().target, "getProductById");
        assert!(table.lookup("/api/health").is_none());
    }

    #[test]
    fn test_reload_without_source() {
        let store = ConfigStore::new(ServerConfig::default());
        assert!(matches!(store.reload(), Err(ConfigError::NoSource)));
    }

    #[test]
    fn test_reload_keeps_config_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "[routes]\n\"/about\" = \"a.tmpl\"\n").unwrap();

        let store = ConfigStore::from_file(&path).unwrap();
        assert_eq!(store.routes().resolve("/about").target, "a.tmpl");

        fs::write(&path, "[routes]\n\"/about\" = \"b.tmpl\"\n").unwrap();
        store.reload().unwrap();
        assert_eq!(store.routes().resolve("/about").target, "b.tmpl");

        fs::write(&path, "[routes\n").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.routes().resolve("/about").target, "b.tmpl");
    }

    #[test]
    fn test_reload_of_emptied_file_keeps_routes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(
            &path,
            "fallbackTarget = \"custom404.tmpl\"\n[routes]\n\"/welcome\" = \"welcome.tmpl\"\n",
        )
        .unwrap();

        let store = ConfigStore::from_file(&path).unwrap();
        assert_eq!(store.routes().resolve("/welcome").target, "welcome.tmpl");
        assert_eq!(store.routes().resolve("/missing").target, "custom404.tmpl");

        for content in ["", "   \n"] {
            fs::write(&path, content).unwrap();
            assert!(matches!(store.reload(), Err(ConfigError::EmptyDocument)));
            assert_eq!(store.routes().resolve("/welcome").target, "welcome.tmpl");
            assert_eq!(store.routes().resolve("/missing").target, "custom404.tmpl");
            assert_eq!(store.config().fallback_target, "custom404.tmpl");
        }
    }
}
