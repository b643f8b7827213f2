//! Inventory arbiter — per-regime allocation bands and rebalance caps.
//!
//! Converts the regime's allocation band into BTC buy/sell capacity for
//! this tick, then caps each by the per-tick rebalance limit and the
//! actual balances. The order manager trims desired levels against
//! these caps, dropping outermost levels first.

use rust_decimal::Decimal;
use tracing::debug;

use steuergrid_core::{PortfolioSnapshot, Qty};

use crate::config::{GridConfig, RegimeLimits};

/// Per-tick buy/sell capacity in BTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryCaps {
    pub max_buy_btc: Qty,
    pub max_sell_btc: Qty,
}

/// Enforces allocation limits on desired grid exposure.
#[derive(Debug, Clone)]
pub struct InventoryArbiter {
    per_tick_rebalance_pct: Decimal,
}

impl InventoryArbiter {
    #[must_use]
    pub fn new(config: &GridConfig) -> Self {
        Self {
            per_tick_rebalance_pct: config.per_tick_rebalance_pct,
        }
    }

    /// Capacity for this tick under the regime's band.
    #[must_use]
    pub fn caps(&self, snapshot: &PortfolioSnapshot, limits: &RegimeLimits) -> InventoryCaps {
        let equity = snapshot.equity_usd();
        let mid = snapshot.mid_price;
        if equity <= Decimal::ZERO || !mid.is_positive() {
            return InventoryCaps {
                max_buy_btc: Qty::ZERO,
                max_sell_btc: Qty::ZERO,
            };
        }

        let alloc = snapshot.btc_alloc_pct();
        let tick_cap_btc = self.per_tick_rebalance_pct * equity / mid.inner();

        let buy_headroom = (limits.btc_max_pct - alloc).max(Decimal::ZERO);
        let max_buy_usd = (buy_headroom * equity)
            .min(tick_cap_btc * mid.inner())
            .min(snapshot.usd_qty.max(Decimal::ZERO));
        let max_buy = max_buy_usd / mid.inner();

        let sell_headroom = (alloc - limits.btc_min_pct).max(Decimal::ZERO);
        let max_sell = (sell_headroom * equity / mid.inner())
            .min(tick_cap_btc)
            .min(snapshot.btc_qty.inner().max(Decimal::ZERO));

        debug!(
            alloc = %alloc,
            max_buy = %max_buy,
            max_sell = %max_sell,
            "inventory caps"
        );
        InventoryCaps {
            max_buy_btc: Qty::new(max_buy),
            max_sell_btc: Qty::new(max_sell),
        }
    }

    /// Trim one side of the grid against its capacity, dropping
    /// outermost levels first and clipping the last kept level.
    #[must_use]
    pub fn trim_levels(
        levels: &[crate::grid::DesiredLevel],
        cap: Qty,
        min_order_btc: Decimal,
    ) -> Vec<crate::grid::DesiredLevel> {
        let mut remaining = cap.inner();
        let mut kept = Vec::with_capacity(levels.len());
        for level in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            if level.qty.inner() <= remaining {
                kept.push(*level);
                remaining -= level.qty.inner();
            } else {
                if remaining >= min_order_btc {
                    kept.push(crate::grid::DesiredLevel {
                        qty: Qty::new(remaining),
                        ..*level
                    });
                }
                break;
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DesiredLevel;
    use rust_decimal_macros::dec;
    use steuergrid_core::{Price, Regime, Side};

    fn snapshot(btc: Decimal, usd: Decimal, mid: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            btc_qty: Qty::new(btc),
            usd_qty: usd,
            mid_price: Price::new(mid),
        }
    }

    fn arbiter(pct: Decimal) -> InventoryArbiter {
        InventoryArbiter::new(&GridConfig {
            per_tick_rebalance_pct: pct,
            ..GridConfig::default()
        })
    }

    #[test]
    fn test_caps_within_band() {
        // 50/50 at 50k: equity 1000, range_bound band 0.40..0.60.
        let snap = snapshot(dec!(0.01), dec!(500), dec!(50000));
        let limits = RegimeLimits::defaults_for(Regime::RangeBound);
        let caps = arbiter(dec!(0.10)).caps(&snap, &limits);

        // Headroom 10% of equity = 100 USD each way, tick cap also 100.
        assert_eq!(caps.max_buy_btc.inner(), dec!(100) / dec!(50000));
        assert_eq!(caps.max_sell_btc.inner(), dec!(100) / dec!(50000));
    }

    #[test]
    fn test_per_tick_cap_binds() {
        let snap = snapshot(dec!(0.01), dec!(500), dec!(50000));
        let limits = RegimeLimits::defaults_for(Regime::RangeBound);
        let caps = arbiter(dec!(0.01)).caps(&snap, &limits);

        // Band headroom is 100 USD but the tick cap is 10 USD.
        assert_eq!(caps.max_buy_btc.inner(), dec!(10) / dec!(50000));
        assert_eq!(caps.max_sell_btc.inner(), dec!(10) / dec!(50000));
    }

    #[test]
    fn test_over_allocation_blocks_buys() {
        // 90% BTC in a range_bound band capped at 60%.
        let snap = snapshot(dec!(0.018), dec!(100), dec!(50000));
        let limits = RegimeLimits::defaults_for(Regime::RangeBound);
        let caps = arbiter(dec!(0.10)).caps(&snap, &limits);

        assert_eq!(caps.max_buy_btc, Qty::ZERO);
        assert!(caps.max_sell_btc.is_positive());
    }

    #[test]
    fn test_balance_bounds_respected() {
        // Band allows more than the wallet holds.
        let snap = snapshot(dec!(0.001), dec!(20), dec!(50000));
        let limits = RegimeLimits::defaults_for(Regime::TrendingUp);
        let caps = arbiter(dec!(1.0)).caps(&snap, &limits);

        // Buys bounded by 20 USD of cash.
        assert!(caps.max_buy_btc.inner() <= dec!(20) / dec!(50000));
        // Sells bounded by held BTC.
        assert!(caps.max_sell_btc.inner() <= dec!(0.001));
    }

    #[test]
    fn test_empty_portfolio_no_caps() {
        let snap = snapshot(dec!(0), dec!(0), dec!(50000));
        let limits = RegimeLimits::defaults_for(Regime::RangeBound);
        let caps = arbiter(dec!(0.10)).caps(&snap, &limits);
        assert_eq!(caps.max_buy_btc, Qty::ZERO);
        assert_eq!(caps.max_sell_btc, Qty::ZERO);
    }

    #[test]
    fn test_trim_drops_outermost_first() {
        let levels = vec![
            DesiredLevel {
                side: Side::Sell,
                price: Price::new(dec!(50250)),
                qty: Qty::new(dec!(0.01)),
            },
            DesiredLevel {
                side: Side::Sell,
                price: Price::new(dec!(50500)),
                qty: Qty::new(dec!(0.01)),
            },
            DesiredLevel {
                side: Side::Sell,
                price: Price::new(dec!(50750)),
                qty: Qty::new(dec!(0.01)),
            },
        ];

        let kept = InventoryArbiter::trim_levels(&levels, Qty::new(dec!(0.015)), dec!(0.0001));
        assert_eq!(kept.len(), 2);
        // Innermost kept whole, second clipped, outermost dropped.
        assert_eq!(kept[0].qty.inner(), dec!(0.01));
        assert_eq!(kept[1].qty.inner(), dec!(0.005));
        assert_eq!(kept[1].price.inner(), dec!(50500));
    }

    #[test]
    fn test_trim_skips_dust_clip() {
        let levels = vec![DesiredLevel {
            side: Side::Buy,
            price: Price::new(dec!(49750)),
            qty: Qty::new(dec!(0.01)),
        }];
        let kept = InventoryArbiter::trim_levels(&levels, Qty::new(dec!(0.00005)), dec!(0.0001));
        assert!(kept.is_empty());
    }
}
