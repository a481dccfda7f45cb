//! Hermetic sandboxed process executor (spec.md §4.5): stage a target's
//! inputs into a fresh temp directory, run its command under a bounded
//! environment allow-list and (on Linux) fresh namespaces, capture
//! interleaved stdout/stderr, and enforce a timeout with a SIGTERM-then-
//! SIGKILL escalation.

pub mod env;
pub mod process;
pub mod sandbox;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use env::EnvBuilder;
pub use process::{ExecOutcome, Executor};
pub use sandbox::{NamespaceConfig, StagedDir};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sandbox setup failed: {0}")]
    Sandbox(String),
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    #[error("process was killed by signal {0}")]
    Killed(i32),
}

/// Everything the executor needs to run one target's command, already
/// resolved by the caller (the scheduler's build/test task) — no label or
/// graph lookups happen inside `exec`.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub command: String,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub sandboxed: bool,
    pub data_files: Vec<(String, PathBuf)>,
}
