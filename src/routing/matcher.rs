//! Path pattern matching.
//!
//! # Responsibilities
//! - Split route patterns into literal and parameter segments
//! - Match concrete paths segment-by-segment
//! - Extract parameter values from matched paths
//!
//! # Design Decisions
//! - Paths are split on `/` exactly as written (no trailing-slash normalization)
//! - Segment counts must be equal for a match
//! - A parameter segment matches any value, including an empty one
//! - Matching is case-sensitive

/// Prefix marking a parameter segment in a route pattern (`/products/:id`).
pub const PARAM_MARKER: char = ':';

/// Parameters captured from a path, in pattern order.
pub type RouteParams = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern such as `/products/:id`.
    pub fn parse(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = raw
            .split('/')
            .map(|part| match part.strip_prefix(PARAM_MARKER) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(part.to_string()),
            })
            .collect();

        Self { raw, segments }
    }

    /// The pattern as written in configuration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if any segment is a parameter.
    pub fn is_parameterized(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Param(_)))
    }

    /// Names of the parameter segments, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Returns true if `path` has the same segment count and every literal
    /// segment matches.
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path.split('/');
        for segment in &self.segments {
            match (segment, parts.next()) {
                (_, None) => return false,
                (Segment::Literal(lit), Some(part)) if lit != part => return false,
                _ => {}
            }
        }
        parts.next().is_none()
    }

    /// Match `path` and capture parameter values.
    ///
    /// Unnamed parameter segments (a bare `:`) match but capture nothing.
    pub fn captures(&self, path: &str) -> Option<RouteParams> {
        if !self.matches(path) {
            return None;
        }

        let params = self
            .segments
            .iter()
            .zip(path.split('/'))
            .filter_map(|(segment, part)| match segment {
                Segment::Param(name) if !name.is_empty() => {
                    Some((name.clone(), part.to_string()))
                }
                _ => None,
            })
            .collect();

        Some(params)
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
