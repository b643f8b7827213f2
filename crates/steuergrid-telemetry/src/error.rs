//! Error types for steuergrid-telemetry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging initialization failed: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
