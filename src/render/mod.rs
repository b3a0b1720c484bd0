//! Render subsystem.
//!
//! # Data Flow
//! ```text
//! (path, raw payload) from HTTP or bus:
//!     → pipeline.rs (resolve route via routing/, build context)
//!     → context.rs (decode payload, inject path + params)
//!     → engine.rs (PageRenderer: target + context → markup)
//!     → RenderResult { markup, state { rendered, path, data } }
//! ```
//!
//! # Design Decisions
//! - The engine sits behind a trait so transports never depend on templating
//! - Contexts are built once and never mutated
//! - Error display strings double as the caller-facing reason

pub mod context;
pub mod engine;
pub mod pipeline;

pub use context::{RenderContext, RenderResult, RenderState};
pub use engine::{EngineError, MiniJinjaRenderer, PageRenderer};
pub use pipeline::{RenderError, RenderPipeline};
