//! Error types for sandbox-tunnel.

use std::time::Duration;

use thiserror::Error;

/// Main error type for sandbox-tunnel operations.
///
/// A guest program exiting with a non-zero status is not an error: it is
/// reported as data in an [`ExecutionOutcome`](crate::execution::ExecutionOutcome).
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Session identifier is missing, empty, or not a safe directory name.
    #[error("invalid session id: {0:?}")]
    InvalidSession(String),

    /// File or interpreter is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path escapes the workspace, or isolation preconditions were violated.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// No interpreter or compiler could be resolved for the language.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Guest process was killed after exceeding its time limit.
    #[error("execution timed out after {}s", .0.as_secs())]
    ExecutionTimeout(Duration),

    /// Writing to a client channel failed.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Request is malformed (e.g. neither code nor filepath supplied).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// PTY-related error.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Fatal startup condition (sandbox image missing, port unavailable).
    #[error("startup failed: {0}")]
    Startup(String),
}

/// Convenience Result type for sandbox-tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// Stable machine-readable code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSession(_) => "INVALID_SESSION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::UnsupportedLanguage(_) => "UNSUPPORTED_LANGUAGE",
            Self::ExecutionTimeout(_) => "EXECUTION_TIMEOUT",
            Self::TransportError(_) => "TRANSPORT_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Pty(_) | Self::Io(_) | Self::LockPoisoned | Self::Startup(_) => "INTERNAL_ERROR",
        }
    }

    /// Map an I/O error on a client path, keeping `NotFound` distinguishable.
    pub fn from_path_io(err: std::io::Error, display: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(display.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied(display.to_string()),
            _ => Self::Io(err),
        }
    }
}
