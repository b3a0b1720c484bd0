//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path (HTTP URI path or envelope `path`)
//!     → router.rs (exact lookup, then ordered pattern scan)
//!     → matcher.rs (segment-by-segment comparison, parameter capture)
//!     → Return: RouteMatch (target + params), fallback when nothing matched
//!
//! Route Compilation (at startup / on reload):
//!     ordered (pattern → target) entries
//!     → split into exact map + parameterized list (declaration order kept)
//!     → Freeze as immutable RouteTable, swapped atomically on reload
//! ```
//!
//! # Design Decisions
//! - Tables are compiled once and never mutated; reload replaces the whole table
//! - Exact matches win over patterns
//! - Patterns are tried in declaration order, first structural match wins
//! - No specificity scoring and no backtracking
//! - Resolution never fails: unmatched paths get the fallback target

pub mod matcher;
pub mod router;

pub use matcher::{PathPattern, RouteParams, PARAM_MARKER};
pub use router::{MatchKind, RouteMatch, RouteTable};
