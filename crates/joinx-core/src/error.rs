//! Error taxonomy of the join planner.
//!
//! Unsupported input is recoverable: the caller keeps its original tree. Capacity and invariant
//! errors are hard failures. Degraded statistics are not errors at all (see `catalog`).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizeError {
    /// A plan node the join planner cannot reorder around.
    #[error("unsupported plan node: {0}")]
    Unsupported(String),
    #[error("join graph has {count} {what}, at most {max} supported")]
    Capacity {
        what: &'static str,
        count: usize,
        max: usize,
    },
    /// Internal contract breach; never expected on well-formed input.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl OptimizeError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        OptimizeError::Invariant(msg.into())
    }

    /// Whether the caller can fall back to the unreordered plan.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OptimizeError::Unsupported(_))
    }
}

pub type OptResult<T> = Result<T, OptimizeError>;
