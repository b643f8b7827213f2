//! Shared enums and value types used across the workspace.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::{Price, Qty};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    RangeBound,
    TrendingUp,
    TrendingDown,
    Chaos,
}

impl Regime {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RangeBound => "range_bound",
            Self::TrendingUp => "trending_up",
            Self::TrendingDown => "trending_down",
            Self::Chaos => "chaos",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine pause state, composed from the tax lock and drawdown level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseState {
    /// Normal operation, both sides quoting.
    Active,
    /// All BTC is tax-locked: buy-only.
    TaxLock,
    /// Drawdown at or past critical: no trading.
    RiskPause,
    /// Tax lock and critical drawdown together: full stop.
    DualLock,
    /// Drawdown past the emergency threshold: tax veto overridden,
    /// selling down is allowed.
    EmergencySell,
}

impl PauseState {
    /// True if any order may be placed in this state.
    #[must_use]
    pub fn trading_allowed(&self) -> bool {
        matches!(self, Self::Active | Self::TaxLock | Self::EmergencySell)
    }

    /// True if buy orders may be placed.
    #[must_use]
    pub fn buy_allowed(&self) -> bool {
        matches!(self, Self::Active | Self::TaxLock)
    }

    /// True if sell orders may be placed.
    #[must_use]
    pub fn sell_allowed(&self) -> bool {
        matches!(self, Self::Active | Self::EmergencySell)
    }
}

impl fmt::Display for PauseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::TaxLock => "tax_lock",
            Self::RiskPause => "risk_pause",
            Self::DualLock => "dual_lock",
            Self::EmergencySell => "emergency_sell",
        };
        f.write_str(s)
    }
}

/// Order slot states for the amend-first state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    #[default]
    Empty,
    PendingNew,
    Live,
    AmendPending,
    CancelPending,
}

impl SlotState {
    /// True while a command is in flight and no further command may be
    /// issued on the slot.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingNew | Self::AmendPending | Self::CancelPending
        )
    }
}

/// Outcome of a tax agent sell evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxDecision {
    /// Sell the full requested quantity.
    Allow,
    /// Sell only part of the requested quantity.
    AllowPartial,
    /// Block the sell.
    Veto,
    /// Emergency drawdown override: sell regardless, taxable events
    /// will be recorded.
    AllowAll,
}

/// How a lot entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotSource {
    #[default]
    Grid,
    Signal,
    Harvest,
}

/// Trading pair identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    #[must_use]
    pub fn xbt_usd() -> Self {
        Self {
            base: "XBT".to_string(),
            quote: "USD".to_string(),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A single fee tier with volume threshold and rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub min_volume_usd: u64,
    pub maker_bps: Decimal,
    pub taker_bps: Decimal,
}

impl FeeTier {
    /// Round-trip cost in basis points assuming maker on both legs.
    #[must_use]
    pub fn rt_cost_bps(&self) -> Decimal {
        self.maker_bps * Decimal::TWO
    }
}

/// Portfolio valuation at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortfolioSnapshot {
    pub btc_qty: Qty,
    pub usd_qty: Decimal,
    pub mid_price: Price,
}

impl PortfolioSnapshot {
    #[must_use]
    pub fn equity_usd(&self) -> Decimal {
        self.usd_qty + self.btc_qty.notional(self.mid_price)
    }

    /// BTC share of equity as a fraction in [0, 1]. Zero when the
    /// portfolio is empty.
    #[must_use]
    pub fn btc_alloc_pct(&self) -> Decimal {
        let equity = self.equity_usd();
        if equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.btc_qty.notional(self.mid_price) / equity
    }
}
