//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/JSON)
//!     → loader.rs (parse, deserialize, fill defaults)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → store.rs (ArcSwap<ServerConfig> + compiled RouteTables)
//!
//! On reload (SIGHUP, file watcher, explicit call):
//!     watcher.rs detects change / Server::reload
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap in store.rs
//!     → next request observes the new tables
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Passed explicitly through `ConfigStore`; no process-global state

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, save_config, ConfigError, ConfigFormat};
pub use schema::{
    BridgeConfig, LimitsConfig, ObservabilityConfig, RouteMap, ServerConfig, TimeoutConfig,
};
pub use store::ConfigStore;
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
