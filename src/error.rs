//! Crate-wide error taxonomy.
//!
//! One variant family per error kind named in the design (`UserInputError`,
//! `ParseError`, `DependencyError`, `BuildError`, `TestError`, `CacheError`,
//! `HashMismatch`, `ConfigError`). Subsystem-local error types convert in via
//! `#[from]` so callers deep in `lang` or `cache` can propagate with `?` and
//! still end up with a crate-wide error at the scheduler boundary.

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::exec::ExecError;
use crate::graph::GraphError;
use crate::label::Label;
use crate::lang::LangError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{message} ({path})")]
    UserInput { message: String, path: String },

    #[error(transparent)]
    Parse(#[from] LangError),

    #[error("dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("build of {label} failed: {reason}")]
    Build { label: Label, reason: String },

    #[error("test of {label} failed: {reason}")]
    Test { label: Label, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(
        "output hash mismatch for {label}: expected one of {expected:?}, got {actual}"
    )]
    HashMismatch {
        label: Label,
        expected: Vec<String>,
        actual: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("dependency cycle: {}", render_cycle(.0))]
    Cycle(Vec<Label>),

    #[error("{label} declares a dependency on unknown target {missing}")]
    Missing { label: Label, missing: Label },
}

fn render_cycle(path: &[Label]) -> String {
    let mut s = String::new();
    for (i, l) in path.iter().enumerate() {
        if i > 0 {
            s.push_str(" -> ");
        }
        s.push_str(&l.to_string());
    }
    if let Some(first) = path.first() {
        s.push_str(" -> ");
        s.push_str(&first.to_string());
    }
    s
}

pub type Result<T> = std::result::Result<T, Error>;
