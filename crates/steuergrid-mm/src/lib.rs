//! Quoting math for the steuergrid engine.
//!
//! Per tick the strategy loop feeds market data through:
//! regime classification -> volatility-adaptive spacing -> allocation
//! skew -> grid levels, with the fee model gating every emitted order
//! on positive expected net edge and the inventory arbiter capping
//! per-tick exposure changes.

pub mod config;
pub mod fees;
pub mod grid;
pub mod inventory;
pub mod regime;
pub mod skew;
pub mod spacing;

pub use config::{GridConfig, RegimeLimits, RegimeRouterConfig, SkewConfig, SpacingConfig};
pub use fees::{FeeModel, KRAKEN_SPOT_TIERS};
pub use grid::{DesiredLevel, GridCenter, GridEngine, GridState};
pub use inventory::{InventoryArbiter, InventoryCaps};
pub use regime::{RegimeDecision, RegimeRouter};
pub use skew::{DeltaSkew, SkewResult};
pub use spacing::{BollingerSpacing, BollingerState};
