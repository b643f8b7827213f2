//! Tier-aware fee model.
//!
//! Central place for all fee decisions. Every component that needs to
//! know "is this trade worth it?" calls `expected_net_edge_bps` before
//! an order is emitted; a non-positive edge blocks the order.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use steuergrid_core::FeeTier;

/// Kraken spot fee schedule for crypto pairs, by 30-day USD volume.
pub const KRAKEN_SPOT_TIERS: [FeeTier; 9] = [
    FeeTier { min_volume_usd: 0, maker_bps: dec!(25), taker_bps: dec!(40) },
    FeeTier { min_volume_usd: 10_000, maker_bps: dec!(20), taker_bps: dec!(35) },
    FeeTier { min_volume_usd: 50_000, maker_bps: dec!(14), taker_bps: dec!(24) },
    FeeTier { min_volume_usd: 100_000, maker_bps: dec!(12), taker_bps: dec!(20) },
    FeeTier { min_volume_usd: 250_000, maker_bps: dec!(8), taker_bps: dec!(18) },
    FeeTier { min_volume_usd: 500_000, maker_bps: dec!(6), taker_bps: dec!(16) },
    FeeTier { min_volume_usd: 1_000_000, maker_bps: dec!(4), taker_bps: dec!(14) },
    FeeTier { min_volume_usd: 5_000_000, maker_bps: dec!(2), taker_bps: dec!(12) },
    FeeTier { min_volume_usd: 10_000_000, maker_bps: dec!(0), taker_bps: dec!(10) },
];

/// Tier-aware fee calculator.
#[derive(Debug, Clone)]
pub struct FeeModel {
    tiers: Vec<FeeTier>,
    volume_30d_usd: u64,
    current: FeeTier,
    adverse_selection_bps: Decimal,
    min_edge_bps: Decimal,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl FeeModel {
    #[must_use]
    pub fn new(volume_30d_usd: u64) -> Self {
        Self::with_tiers(KRAKEN_SPOT_TIERS.to_vec(), volume_30d_usd)
    }

    #[must_use]
    pub fn with_tiers(tiers: Vec<FeeTier>, volume_30d_usd: u64) -> Self {
        let current = Self::resolve(&tiers, volume_30d_usd);
        Self {
            tiers,
            volume_30d_usd,
            current,
            adverse_selection_bps: dec!(10),
            min_edge_bps: dec!(5),
        }
    }

    #[must_use]
    pub fn current_tier(&self) -> FeeTier {
        self.current
    }

    #[must_use]
    pub fn volume_30d_usd(&self) -> u64 {
        self.volume_30d_usd
    }

    /// Update the 30-day rolling volume and re-resolve the tier.
    pub fn update_volume(&mut self, volume_30d_usd: u64) {
        self.volume_30d_usd = volume_30d_usd;
        let tier = Self::resolve(&self.tiers, volume_30d_usd);
        if tier != self.current {
            debug!(volume = volume_30d_usd, maker_bps = %tier.maker_bps, "Fee tier changed");
        }
        self.current = tier;
    }

    /// Maker fee, clamped to zero. Some venues offer maker rebates;
    /// the spacing math assumes non-negative fees.
    #[must_use]
    pub fn maker_bps(&self) -> Decimal {
        self.current.maker_bps.max(Decimal::ZERO)
    }

    #[must_use]
    pub fn taker_bps(&self) -> Decimal {
        self.current.taker_bps.max(Decimal::ZERO)
    }

    /// Round-trip cost assuming maker on both legs (post-only grid).
    #[must_use]
    pub fn rt_cost_bps(&self) -> Decimal {
        self.maker_bps() * Decimal::TWO
    }

    /// Net edge per round-trip after fees and adverse selection.
    /// Non-positive means the spacing cannot pay for itself.
    #[must_use]
    pub fn expected_net_edge_bps(&self, spacing_bps: Decimal) -> Decimal {
        spacing_bps - self.rt_cost_bps() - self.adverse_selection_bps
    }

    /// Minimum spacing yielding at least `min_edge_bps` of profit.
    /// Positive even at the zero-fee top tier.
    #[must_use]
    pub fn min_profitable_spacing_bps(&self) -> Decimal {
        (self.rt_cost_bps() + self.adverse_selection_bps + self.min_edge_bps).max(Decimal::ONE)
    }

    /// Absolute USD fee for a notional at the current tier.
    #[must_use]
    pub fn fee_for_notional(&self, notional_usd: Decimal, is_maker: bool) -> Decimal {
        let rate = if is_maker {
            self.maker_bps()
        } else {
            self.taker_bps()
        };
        notional_usd * rate / dec!(10000)
    }

    /// Extra cost if a post-only order slips through as a taker.
    #[must_use]
    pub fn taker_penalty_bps(&self) -> Decimal {
        (self.current.taker_bps - self.current.maker_bps).max(Decimal::ZERO)
    }

    /// USD volume still needed to reach the next tier, if any.
    #[must_use]
    pub fn volume_to_next_tier(&self) -> Option<u64> {
        self.tiers
            .iter()
            .find(|t| t.min_volume_usd > self.volume_30d_usd)
            .map(|t| t.min_volume_usd - self.volume_30d_usd)
    }

    fn resolve(tiers: &[FeeTier], volume: u64) -> FeeTier {
        let mut resolved = tiers[0];
        for tier in tiers {
            if volume >= tier.min_volume_usd {
                resolved = *tier;
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_resolution() {
        let fees = FeeModel::new(0);
        assert_eq!(fees.maker_bps(), dec!(25));

        let mut fees = FeeModel::new(60_000);
        assert_eq!(fees.maker_bps(), dec!(14));
        assert_eq!(fees.taker_bps(), dec!(24));

        fees.update_volume(12_000_000);
        assert_eq!(fees.maker_bps(), dec!(0));
        assert_eq!(fees.taker_bps(), dec!(10));
    }

    #[test]
    fn test_rt_cost_and_edge() {
        let fees = FeeModel::new(0);
        assert_eq!(fees.rt_cost_bps(), dec!(50));
        // 80 bps spacing - 50 rt - 10 adverse = 20 bps edge.
        assert_eq!(fees.expected_net_edge_bps(dec!(80)), dec!(20));
        assert!(fees.expected_net_edge_bps(dec!(60)) <= Decimal::ZERO);
    }

    #[test]
    fn test_min_profitable_spacing() {
        let fees = FeeModel::new(0);
        // 2*25 + 10 + 5.
        assert_eq!(fees.min_profitable_spacing_bps(), dec!(65));

        // Zero-fee top tier still demands a positive spacing.
        let fees = FeeModel::new(20_000_000);
        assert_eq!(fees.min_profitable_spacing_bps(), dec!(15));
        assert!(fees.min_profitable_spacing_bps() > Decimal::ZERO);
    }

    #[test]
    fn test_fee_for_notional() {
        let fees = FeeModel::new(0);
        assert_eq!(fees.fee_for_notional(dec!(500), true), dec!(1.25));
        assert_eq!(fees.fee_for_notional(dec!(500), false), dec!(2));
    }

    #[test]
    fn test_volume_to_next_tier() {
        let fees = FeeModel::new(60_000);
        assert_eq!(fees.volume_to_next_tier(), Some(40_000));
        let fees = FeeModel::new(10_000_000);
        assert_eq!(fees.volume_to_next_tier(), None);
    }

    #[test]
    fn test_taker_penalty() {
        let fees = FeeModel::new(20_000_000);
        assert_eq!(fees.taker_penalty_bps(), dec!(10));
    }
}
