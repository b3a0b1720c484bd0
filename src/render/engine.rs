//! Template engine adapter.
//!
//! # Responsibilities
//! - Turn `(target, context)` into markup
//! - Load every template under the configured directory once at startup
//!
//! # Design Decisions
//! - The pipeline only sees [`PageRenderer`]; no HTTP or bus types cross it
//! - Templates are compiled up front, so a missing directory fails startup
//!   rather than the first request
//! - All templates are HTML-escaped regardless of file extension

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use minijinja::{AutoEscape, Environment, ErrorKind};
use thiserror::Error;

use crate::render::context::RenderContext;

/// File extensions picked up from the templates directory.
pub const TEMPLATE_EXTENSIONS: &[&str] = &["tmpl", "html", "jinja", "j2"];

/// Errors raised by the template engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("templates directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown render target: {0}")]
    UnknownTarget(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

/// Capability to produce markup for a render target.
pub trait PageRenderer: Send + Sync {
    fn render(&self, target: &str, context: &RenderContext) -> Result<String, EngineError>;
}

/// [`PageRenderer`] backed by a MiniJinja environment.
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
    targets: Vec<String>,
}

impl MiniJinjaRenderer {
    /// Load every template below `dir`.
    ///
    /// Template names are paths relative to `dir` with `/` separators, so
    /// `templates/pages/about.tmpl` is the target `pages/about.tmpl`.
    pub fn from_dir(dir: &Path) -> Result<Self, EngineError> {
        if !dir.is_dir() {
            return Err(EngineError::MissingDirectory(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        collect_templates(dir, &mut files)?;
        files.sort();

        let mut sources = Vec::with_capacity(files.len());
        for path in files {
            let source = fs::read_to_string(&path).map_err(|source| EngineError::Io {
                path: path.clone(),
                source,
            })?;
            sources.push((template_name(dir, &path), source));
        }

        let renderer = Self::from_sources(sources)?;
        tracing::info!(
            dir = %dir.display(),
            templates = renderer.targets.len(),
            "Templates loaded"
        );
        Ok(renderer)
    }

    /// Build a renderer from in-memory `(name, source)` pairs.
    pub fn from_sources<I, N, S>(sources: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);

        let mut targets = Vec::new();
        for (name, source) in sources {
            let name = name.into();
            env.add_template_owned(name.clone(), source.into())?;
            targets.push(name);
        }

        Ok(Self { env, targets })
    }

    /// Names of all loaded templates.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl PageRenderer for MiniJinjaRenderer {
    fn render(&self, target: &str, context: &RenderContext) -> Result<String, EngineError> {
        let template = self.env.get_template(target).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => EngineError::UnknownTarget(target.to_string()),
            _ => EngineError::Template(e),
        })?;
        Ok(template.render(context)?)
    }
}

fn collect_templates(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EngineError> {
    let io_err = |source| EngineError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            collect_templates(&path, out)?;
        } else if has_template_extension(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn has_template_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext))
}

fn template_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
