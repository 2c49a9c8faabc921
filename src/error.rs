//! Top-level error type for the storage kernel.
//!
//! Every subsystem defines its own `thiserror` enum scoped to its own
//! failure modes, then maps each variant onto one of the seven kinds
//! here via `From`. Callers outside the crate only ever see [`CoreError`].

use thiserror::Error;

/// The seven error kinds the core reports to callers.
///
/// Corruption is fail-stop: callers must not attempt to self-repair or
/// retry the same operation expecting a different result.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found")]
    NotFound,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("corruption: {0}")]
    Corruption(String),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        CoreError::AlreadyExists(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        CoreError::Corruption(msg.into())
    }

    /// True for kinds a caller may reasonably retry (unlike corruption).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::IoError(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
