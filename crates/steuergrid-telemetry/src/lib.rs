//! Telemetry: structured logging setup and engine counters.

pub mod counters;
pub mod error;
pub mod logging;

pub use counters::EngineCounters;
pub use error::{Result, TelemetryError};
pub use logging::init_logging;
