//! Crate-wide error type.
//!
//! Replaces the original C++'s `throw std::logic_error(...)` calls and the
//! teacher's ad hoc `IllegalBoard` marker struct with a single `thiserror`
//! enum carrying enough context to format a UCI `info string` line.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("failed to parse {what}: {detail}")]
    ParseError { what: &'static str, detail: String },

    #[error("illegal move {mv} in position {fen}")]
    InvalidMove { mv: String, fen: String },

    #[error("out of memory: {context}")]
    OutOfMemory { context: &'static str },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("internal engine error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
