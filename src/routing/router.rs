//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Resolve a path to its render target
//! - Fall back to the configured default target
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) exact lookup via HashMap
//! - O(n) pattern scan in declaration order (acceptable for typical route counts)
//! - Duplicate exact patterns keep the first declaration

use std::collections::HashMap;

use crate::routing::matcher::{PathPattern, RouteParams};

/// How a path was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Pattern,
    Fallback,
}

/// Result of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    /// Render target identifier.
    pub target: &'a str,
    /// Parameters captured from a parameterized pattern.
    pub params: RouteParams,
    pub kind: MatchKind,
}

#[derive(Debug, Clone)]
struct PatternRoute {
    pattern: PathPattern,
    target: String,
}

/// Ordered path → target table with a fallback target.
#[derive(Debug, Clone)]
pub struct RouteTable {
    exact: HashMap<String, String>,
    patterns: Vec<PatternRoute>,
    fallback: String,
    len: usize,
}

impl RouteTable {
    /// Compile a table from `(pattern, target)` entries in declaration order.
    pub fn new<I, P, T>(routes: I, fallback: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (P, T)>,
        P: Into<String>,
        T: Into<String>,
    {
        let mut exact = HashMap::new();
        let mut patterns = Vec::new();
        let mut len = 0;

        for (pattern, target) in routes {
            let pattern = PathPattern::parse(pattern);
            let target = target.into();
            len += 1;

            if pattern.is_parameterized() {
                patterns.push(PatternRoute { pattern, target });
            } else if exact.contains_key(pattern.as_str()) {
                tracing::warn!(
                    pattern = %pattern,
                    "Duplicate route pattern ignored; first declaration wins"
                );
            } else {
                exact.insert(pattern.as_str().to_string(), target);
            }
        }

        Self {
            exact,
            patterns,
            fallback: fallback.into(),
            len,
        }
    }

    /// Resolve `path` to a render target. Never fails.
    pub fn resolve(&self, path: &str) -> RouteMatch<'_> {
        self.lookup(path).unwrap_or_else(|| RouteMatch {
            target: &self.fallback,
            params: RouteParams::new(),
            kind: MatchKind::Fallback,
        })
    }

    /// Resolve `path` without falling back.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch<'_>> {
        if let Some(target) = self.exact.get(path) {
            return Some(RouteMatch {
                target,
                params: RouteParams::new(),
                kind: MatchKind::Exact,
            });
        }

        self.patterns.iter().find_map(|route| {
            route.pattern.captures(path).map(|params| RouteMatch {
                target: &route.target,
                params,
                kind: MatchKind::Pattern,
            })
        })
    }

    /// The fallback target.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Number of declared routes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
