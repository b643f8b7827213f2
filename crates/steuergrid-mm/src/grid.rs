//! Grid level computation.
//!
//! Emits N desired (side, price, qty) levels around a center price.
//! Buy prices round down to the venue tick, sell prices round up, so
//! post-only orders survive the skew offsets. Quantities round down to
//! the lot step and levels below the venue minimum are dropped.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use steuergrid_core::{Price, Qty, Side, BTC_LOT_STEP};

use crate::config::GridConfig;

/// Which reference price centers the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridCenter {
    /// Volume-weighted average of recent trades; falls back to mid
    /// until trades arrive.
    #[default]
    Vwap,
    Mid,
}

/// What the strategy wants resting at one grid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredLevel {
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

/// Snapshot of the computed grid.
#[derive(Debug, Clone, Default)]
pub struct GridState {
    pub center: Price,
    pub buy_levels: Vec<DesiredLevel>,
    pub sell_levels: Vec<DesiredLevel>,
}

impl GridState {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buy_levels.is_empty() && self.sell_levels.is_empty()
    }
}

/// Computes desired grid levels around a center price.
#[derive(Debug, Clone)]
pub struct GridEngine {
    config: GridConfig,
}

impl GridEngine {
    #[must_use]
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Compute the grid.
    ///
    /// Buy prices decrease strictly with the level index, sell prices
    /// increase strictly. A crossed grid (`sell[0] <= buy[0]`, possible
    /// when spacing collapses below one tick) yields an empty grid.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn compute(
        &self,
        center: Price,
        buy_spacing_bps: Decimal,
        sell_spacing_bps: Decimal,
        buy_levels: u32,
        sell_levels: u32,
        order_size_scale: Decimal,
    ) -> GridState {
        if !center.is_positive() {
            return GridState::default();
        }

        let size_usd = self.config.order_size_usd * order_size_scale;
        let mut buys = Vec::with_capacity(buy_levels as usize);
        let mut sells = Vec::with_capacity(sell_levels as usize);

        for i in 0..buy_levels {
            let price = self
                .level_price(center, Side::Buy, buy_spacing_bps, i)
                .floor_to_tick(self.config.price_tick);
            if !price.is_positive() {
                continue;
            }
            if let Some(qty) = self.level_qty(price, size_usd) {
                buys.push(DesiredLevel {
                    side: Side::Buy,
                    price,
                    qty,
                });
            }
        }

        for i in 0..sell_levels {
            let price = self
                .level_price(center, Side::Sell, sell_spacing_bps, i)
                .ceil_to_tick(self.config.price_tick);
            if let Some(qty) = self.level_qty(price, size_usd) {
                sells.push(DesiredLevel {
                    side: Side::Sell,
                    price,
                    qty,
                });
            }
        }

        if let (Some(b0), Some(s0)) = (buys.first(), sells.first()) {
            if s0.price <= b0.price {
                warn!(
                    buy0 = %b0.price,
                    sell0 = %s0.price,
                    center = %center,
                    "Crossed grid, emitting nothing"
                );
                return GridState {
                    center,
                    buy_levels: Vec::new(),
                    sell_levels: Vec::new(),
                };
            }
        }

        GridState {
            center,
            buy_levels: buys,
            sell_levels: sells,
        }
    }

    fn level_price(&self, center: Price, side: Side, spacing_bps: Decimal, index: u32) -> Price {
        let steps = Decimal::from(index + 1);
        let offset = if self.config.additive_spacing {
            // Fixed USD ladder, independent of the center.
            self.config.additive_step_usd * steps
        } else {
            center.inner() * (spacing_bps * steps) / dec!(10000)
        };
        match side {
            Side::Buy => Price::new(center.inner() - offset),
            Side::Sell => Price::new(center.inner() + offset),
        }
    }

    fn level_qty(&self, price: Price, size_usd: Decimal) -> Option<Qty> {
        if !price.is_positive() {
            return None;
        }
        let qty = Qty::new(size_usd / price.inner()).floor_to_lot(BTC_LOT_STEP);
        if qty.inner() < self.config.min_order_btc {
            return None;
        }
        Some(qty)
    }
}
