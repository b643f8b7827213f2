//! Bollinger band + ATR volatility-adaptive grid spacing.
//!
//! Two complementary volatility measures: band width (statistical
//! deviation from the rolling mean) and ATR (actual traded range per
//! period). Wider bands mean wider spacing to dodge adverse selection;
//! narrow bands tighten the grid to capture more round-trips.
//!
//! The blend is floored at the fee model's minimum profitable spacing
//! and capped at a configured maximum.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;

use steuergrid_core::Price;

use crate::config::SpacingConfig;

/// Current band state, recomputed per update once the window fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BollingerState {
    pub sma: Decimal,
    pub upper: Decimal,
    pub lower: Decimal,
    pub band_width_bps: Decimal,
    pub std_dev: Decimal,
    pub atr_bps: Option<Decimal>,
    pub suggested_spacing_bps: Decimal,
}

/// Rolling Bollinger + ATR spacing calculator.
#[derive(Debug)]
pub struct BollingerSpacing {
    config: SpacingConfig,
    /// Effective floor: config minimum raised to the fee model's
    /// minimum profitable spacing.
    min_spacing_bps: Decimal,
    prices: VecDeque<Decimal>,
    highs: VecDeque<Decimal>,
    lows: VecDeque<Decimal>,
    closes: VecDeque<Decimal>,
    atr: Option<Decimal>,
    state: Option<BollingerState>,
}

impl BollingerSpacing {
    /// `fee_floor_bps` comes from `FeeModel::min_profitable_spacing_bps`.
    #[must_use]
    pub fn new(config: SpacingConfig, fee_floor_bps: Decimal) -> Self {
        let min_spacing_bps = config.min_spacing_bps.max(fee_floor_bps);
        Self {
            config,
            min_spacing_bps,
            prices: VecDeque::new(),
            highs: VecDeque::new(),
            lows: VecDeque::new(),
            closes: VecDeque::new(),
            atr: None,
            state: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> Option<&BollingerState> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn min_spacing_bps(&self) -> Decimal {
        self.min_spacing_bps
    }

    /// Spacing to use this tick: the blended suggestion once the window
    /// is full, the floor before that.
    #[must_use]
    pub fn spacing_bps(&self) -> Decimal {
        self.state
            .as_ref()
            .map_or(self.min_spacing_bps, |s| s.suggested_spacing_bps)
    }

    /// Add an observation. `high`/`low` default to the mid when the
    /// caller has no per-period range.
    pub fn update(
        &mut self,
        mid: Price,
        high: Option<Price>,
        low: Option<Price>,
    ) -> Option<&BollingerState> {
        let mid = mid.inner();
        self.prices.push_back(mid);
        while self.prices.len() > self.config.window {
            self.prices.pop_front();
        }

        if self.config.atr_enabled {
            self.highs.push_back(high.map_or(mid, |p| p.inner()));
            self.lows.push_back(low.map_or(mid, |p| p.inner()));
            self.closes.push_back(mid);
            let cap = self.config.atr_window + 1;
            while self.closes.len() > cap {
                self.highs.pop_front();
                self.lows.pop_front();
                self.closes.pop_front();
            }
            self.compute_atr();
        }

        if self.prices.len() < self.config.window {
            self.state = None;
            return None;
        }

        let n = Decimal::from(self.prices.len());
        let sma: Decimal = self.prices.iter().copied().sum::<Decimal>() / n;
        if sma <= Decimal::ZERO {
            self.state = None;
            return None;
        }

        // Population standard deviation (denominator n); the square
        // root goes through f64, the only float in this path.
        let variance: Decimal = self
            .prices
            .iter()
            .map(|p| (*p - sma) * (*p - sma))
            .sum::<Decimal>()
            / n;
        let std_dev = Decimal::from_f64(variance.to_f64().unwrap_or(0.0).sqrt())
            .unwrap_or(Decimal::ZERO);

        let offset = self.config.multiplier * std_dev;
        let upper = sma + offset;
        let lower = sma - offset;
        let band_width_bps = (upper - lower) / sma * dec!(10000);

        let bb_spacing = band_width_bps * self.config.spacing_scale;
        let (atr_bps, raw_spacing) = match self.atr {
            Some(atr) if self.config.atr_enabled => {
                let atr_bps = atr / sma * dec!(10000);
                let atr_spacing = atr_bps * self.config.spacing_scale;
                let w = self.config.atr_weight;
                (
                    Some(atr_bps),
                    (Decimal::ONE - w) * bb_spacing + w * atr_spacing,
                )
            }
            _ => (None, bb_spacing),
        };

        let suggested = raw_spacing
            .max(self.min_spacing_bps)
            .min(self.config.max_spacing_bps);

        self.state = Some(BollingerState {
            sma,
            upper,
            lower,
            band_width_bps,
            std_dev,
            atr_bps,
            suggested_spacing_bps: suggested,
        });
        self.state.as_ref()
    }

    fn compute_atr(&mut self) {
        if self.closes.len() < 2 {
            self.atr = None;
            return;
        }
        let mut sum = Decimal::ZERO;
        let mut count = Decimal::ZERO;
        for i in 1..self.closes.len() {
            let high = self.highs[i];
            let low = self.lows[i];
            let prev_close = self.closes[i - 1];
            let tr = (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs());
            sum += tr;
            count += Decimal::ONE;
        }
        self.atr = Some(sum / count);
    }
}
