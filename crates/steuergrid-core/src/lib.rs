//! Core domain types for the steuergrid trading engine.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `Price`, `Qty`: precision-safe decimal types with directional rounding
//! - `Side`, `Regime`, `PauseState`, `SlotState`: trading enums
//! - `ExecEvent`, `Fill`: execution events from the exchange session
//! - `FeeTier`, `PortfolioSnapshot`: shared value types

pub mod decimal;
pub mod error;
pub mod events;
pub mod types;

pub use decimal::{Price, Qty, BTC_LOT_STEP, USD_TICK};
pub use error::{CoreError, Result};
pub use events::{ExecEvent, Fill};
pub use types::{
    FeeTier, LotSource, Pair, PauseState, PortfolioSnapshot, Regime, Side, SlotState, TaxDecision,
};
