//! Allocation-deviation quote skew.
//!
//! When BTC allocation drifts above target, buys widen and sells
//! tighten so the grid leans toward selling the excess; below target
//! the skew mirrors. The offset is linear in the deviation and clamped
//! so a runaway allocation can never fold a side into the mid.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::SkewConfig;

/// Computed skew offsets for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkewResult {
    /// Signed skew after clamping; positive = over-allocated.
    pub skew_bps: Decimal,
    /// Pre-clamp value, for diagnostics.
    pub raw_skew_bps: Decimal,
    /// Allocation deviation from target (fraction, signed).
    pub deviation: Decimal,
}

/// Computes quote asymmetry from allocation deviation.
#[derive(Debug, Clone, Default)]
pub struct DeltaSkew {
    config: SkewConfig,
}

impl DeltaSkew {
    #[must_use]
    pub fn new(config: SkewConfig) -> Self {
        Self { config }
    }

    /// Skew in bps for the given allocation vs. target (fractions).
    #[must_use]
    pub fn compute(&self, btc_alloc_pct: Decimal, target_pct: Decimal) -> SkewResult {
        let deviation = btc_alloc_pct - target_pct;
        // Deviation in percentage points times sensitivity.
        let raw = deviation * dec!(100) * self.config.sensitivity;
        let clamped = raw
            .max(-self.config.max_skew_bps)
            .min(self.config.max_skew_bps);
        SkewResult {
            skew_bps: clamped,
            raw_skew_bps: raw,
            deviation,
        }
    }

    /// Apply a skew to the base spacing, returning
    /// `(buy_spacing_bps, sell_spacing_bps)`. Both sides stay at or
    /// above `min_bps`.
    #[must_use]
    pub fn apply(
        &self,
        base_spacing_bps: Decimal,
        skew: SkewResult,
        min_bps: Decimal,
    ) -> (Decimal, Decimal) {
        let buy = (base_spacing_bps + skew.skew_bps).max(min_bps);
        let sell = (base_spacing_bps - skew.skew_bps).max(min_bps);
        (buy, sell)
    }
}
