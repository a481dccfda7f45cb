//! BUILD-language failure modes (spec.md §4.1): parse-phase errors are
//! per-package fatal, evaluation errors propagate to the enclosing
//! `subinclude`/target-declaration call.

use thiserror::Error;

use super::lexer::Position;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LangError {
    #[error("{0}: syntax error: {1}")]
    ParseError(Position, String),

    #[error("{0}: name {1:?} is not defined")]
    NameError(Position, String),

    #[error("{0}: type error: {1}")]
    TypeError(Position, String),

    #[error("{0}: unknown argument {1:?} for {2}")]
    UnknownArgument(Position, String, String),

    #[error("subinclude cycle: {}", .0.join(" -> "))]
    SubincludeCycle(Vec<String>),

    #[error("{0}: assertion failed: {1}")]
    AssertionFailed(Position, String),

    #[error("{0}: target {1:?} already declared in this package")]
    DuplicateTarget(Position, String),

    #[error("{0}: {1}")]
    Other(Position, String),
}

pub type Result<T> = std::result::Result<T, LangError>;
