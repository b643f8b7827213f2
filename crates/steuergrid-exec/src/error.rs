//! Error types for steuergrid-exec.

use thiserror::Error;

/// Execution layer errors. Slot-local conditions (amend rejects, order
/// rejects) are handled inside the slot machine and never surface here;
/// these are the errors a session call itself can produce.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Exchange authentication failed: {0}")]
    Auth(String),

    #[error("Exchange transiently unavailable: {0}")]
    Transient(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Session closed")]
    SessionClosed,
}

/// Result type alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecError>;
