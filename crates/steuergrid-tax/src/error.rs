//! Error types for steuergrid-tax.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Tax ledger error types.
#[derive(Debug, Error)]
pub enum TaxError {
    /// A sell demanded more BTC than the ledger holds. This is never
    /// satisfied partially — the caller must treat it as a ledger
    /// mismatch and stop trading.
    #[error("Insufficient lots: requested {requested} BTC, ledger holds {available} BTC")]
    InsufficientLots {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Ledger corruption: {0}")]
    LedgerCorruption(String),

    #[error("No EUR/USD rate available on or before {0}")]
    RateUnavailable(NaiveDate),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for tax operations.
pub type Result<T> = std::result::Result<T, TaxError>;
