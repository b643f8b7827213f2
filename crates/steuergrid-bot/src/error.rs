//! Application errors with CLI exit codes.

use thiserror::Error;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Ledger corruption: {0}")]
    LedgerCorruption(String),

    #[error("Exchange authentication failed: {0}")]
    ExchangeAuth(String),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Exit codes: 0 success, 2 config error, 3 ledger corruption,
    /// 4 exchange auth failure, 1 any other fatal.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::LedgerCorruption(_) => 3,
            Self::ExchangeAuth(_) => 4,
            Self::Other(_) => 1,
        }
    }
}

impl From<steuergrid_tax::TaxError> for AppError {
    fn from(e: steuergrid_tax::TaxError) -> Self {
        match e {
            steuergrid_tax::TaxError::LedgerCorruption(msg) => Self::LedgerCorruption(msg),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<steuergrid_exec::ExecError> for AppError {
    fn from(e: steuergrid_exec::ExecError) -> Self {
        match e {
            steuergrid_exec::ExecError::Auth(msg) => Self::ExchangeAuth(msg),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::Other(e.to_string())
    }
}

/// Result type alias for application operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::Config("x".into()).exit_code(), 2);
        assert_eq!(AppError::LedgerCorruption("x".into()).exit_code(), 3);
        assert_eq!(AppError::ExchangeAuth("x".into()).exit_code(), 4);
        assert_eq!(AppError::Other("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_tax_error_mapping() {
        let err: AppError = steuergrid_tax::TaxError::LedgerCorruption("bad json".into()).into();
        assert_eq!(err.exit_code(), 3);
    }
}
