//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate route patterns and targets
//! - Validate value ranges (timeouts > 0, worker counts)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system (startup and reload)

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{RouteMap, ServerConfig};
use crate::routing::PathPattern;

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{section} pattern '{pattern}' must start with '/'")]
    RelativePattern { section: &'static str, pattern: String },

    #[error("{section} pattern '{pattern}' has an empty target")]
    EmptyTarget { section: &'static str, pattern: String },

    #[error("{section} pattern '{pattern}' has an unnamed parameter segment")]
    UnnamedParam { section: &'static str, pattern: String },

    #[error("{section} pattern '{pattern}' declares parameter '{name}' more than once")]
    DuplicateParam {
        section: &'static str,
        pattern: String,
        name: String,
    },

    #[error("api prefix '{0}' must start with '/' and must not end with '/'")]
    InvalidApiPrefix(String),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("bridge request and response topics must differ (both '{0}')")]
    SameTopics(String),

    #[error("invalid metrics address '{0}'")]
    InvalidMetricsAddress(String),
}

/// Validate a fully-merged configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_routes("routes", &config.routes, &mut errors);
    validate_routes("api_endpoints", &config.api_endpoints, &mut errors);

    if config.fallback_target.trim().is_empty() {
        errors.push(ValidationError::EmptyTarget {
            section: "fallback_target",
            pattern: String::new(),
        });
    }

    let prefix = &config.api_prefix;
    if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
        errors.push(ValidationError::InvalidApiPrefix(prefix.clone()));
    }

    for (field, value) in [
        ("timeouts.render_ms", config.timeouts.render_ms),
        ("timeouts.publish_ms", config.timeouts.publish_ms),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("bridge.workers", config.bridge.workers as u64),
        ("bridge.queue_capacity", config.bridge.queue_capacity as u64),
        ("limits.max_body_bytes", config.limits.max_body_bytes as u64),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(field));
        }
    }

    if config.bridge.request_topic == config.bridge.response_topic {
        errors.push(ValidationError::SameTopics(config.bridge.request_topic.clone()));
    }

    if let Some(addr) = &config.observability.metrics_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidMetricsAddress(addr.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_routes(section: &'static str, routes: &RouteMap, errors: &mut Vec<ValidationError>) {
    for (pattern, target) in routes.iter() {
        if !pattern.starts_with('/') {
            errors.push(ValidationError::RelativePattern {
                section,
                pattern: pattern.to_string(),
            });
        }
        if target.trim().is_empty() {
            errors.push(ValidationError::EmptyTarget {
                section,
                pattern: pattern.to_string(),
            });
        }

        let compiled = PathPattern::parse(pattern);
        let mut seen = HashSet::new();
        for name in compiled.param_names() {
            if name.is_empty() {
                errors.push(ValidationError::UnnamedParam {
                    section,
                    pattern: pattern.to_string(),
                });
            } else if !seen.insert(name) {
                errors.push(ValidationError::DuplicateParam {
                    section,
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
        }
    }
}
