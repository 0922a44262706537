//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures of the ledger model.
///
/// Business rejections (exhausted balance, used trial, active block) are not
/// errors here; they are `DispatchRejection` in `creditgate-ledger`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier failed to parse or normalize.
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },

    /// Input rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A write would break a ledger invariant (e.g. a negative balance).
    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    /// The record moved past the version it was read at.
    #[error("stale version: expected {expected}, found {actual}")]
    StaleVersion { expected: u64, actual: u64 },

    /// A job already holds its single terminal state.
    #[error("job {job_id} already {status}")]
    AlreadySettled { job_id: String, status: &'static str },
}

impl DomainError {
    pub fn invalid_id(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}
