//! Market regime classification.
//!
//! Blends EWMA tick-return volatility, short-horizon momentum and a
//! trailing VWAP into one of four regimes. A candidate regime must
//! persist for a configurable number of consecutive ticks before the
//! router switches, to avoid flapping at threshold boundaries.
//!
//! Volatility and momentum are f64 — the only floating point in the
//! engine. They never touch a price directly; the router only outputs
//! a regime tag and the VWAP (exact decimal) as an alternative grid
//! center.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::info;

use steuergrid_core::{Price, Qty, Regime};

use crate::config::{RegimeLimits, RegimeRouterConfig};

/// Result of a classification pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeDecision {
    pub regime: Regime,
    pub limits: RegimeLimits,
    pub ewma_vol: f64,
    pub momentum: f64,
}

/// Classifies the market regime from price and trade updates.
#[derive(Debug)]
pub struct RegimeRouter {
    config: RegimeRouterConfig,
    alpha: f64,
    ewma_var: f64,
    var_initialized: bool,
    last_price: Option<Decimal>,

    mids: VecDeque<Decimal>,
    trades: VecDeque<(Decimal, Decimal)>,
    vwap_num: Decimal,
    vwap_den: Decimal,

    current: Regime,
    candidate: Regime,
    candidate_streak: u32,

    pub regime_changes: u64,
}

impl RegimeRouter {
    #[must_use]
    pub fn new(config: RegimeRouterConfig) -> Self {
        let alpha = 2.0 / (f64::from(config.ewma_span) + 1.0);
        Self {
            config,
            alpha,
            ewma_var: 0.0,
            var_initialized: false,
            last_price: None,
            mids: VecDeque::new(),
            trades: VecDeque::new(),
            vwap_num: Decimal::ZERO,
            vwap_den: Decimal::ZERO,
            current: Regime::RangeBound,
            candidate: Regime::RangeBound,
            candidate_streak: 0,
            regime_changes: 0,
        }
    }

    #[must_use]
    pub fn regime(&self) -> Regime {
        self.current
    }

    #[must_use]
    pub fn ewma_vol(&self) -> f64 {
        self.ewma_var.sqrt()
    }

    /// VWAP over the trailing trade window. `None` until a trade
    /// arrives; callers fall back to the mid.
    #[must_use]
    pub fn vwap(&self) -> Option<Price> {
        if self.vwap_den.is_zero() {
            return None;
        }
        Some(Price::new(self.vwap_num / self.vwap_den))
    }

    /// Feed a new mid price. Call once per tick.
    pub fn update_price(&mut self, mid: Price) {
        let price = mid.inner();
        if let Some(last) = self.last_price {
            if !last.is_zero() {
                let ret = ((price - last) / last).to_f64().unwrap_or(0.0);
                if self.var_initialized {
                    self.ewma_var =
                        (1.0 - self.alpha) * self.ewma_var + self.alpha * ret * ret;
                } else if ret != 0.0 {
                    // First non-zero return seeds the variance.
                    self.ewma_var = ret * ret;
                    self.var_initialized = true;
                }
            }
        }
        self.last_price = Some(price);

        self.mids.push_back(price);
        while self.mids.len() > self.config.momentum_window {
            self.mids.pop_front();
        }
    }

    /// Feed a public trade print for VWAP.
    pub fn update_trade(&mut self, price: Price, qty: Qty) {
        self.trades.push_back((price.inner(), qty.inner()));
        self.vwap_num += price.inner() * qty.inner();
        self.vwap_den += qty.inner();
        while self.trades.len() > self.config.vwap_window {
            if let Some((p, q)) = self.trades.pop_front() {
                self.vwap_num -= p * q;
                self.vwap_den -= q;
            }
        }
    }

    /// Momentum over the mid ring: (newest - oldest) / oldest.
    #[must_use]
    pub fn momentum(&self) -> f64 {
        if self.mids.len() < 2 {
            return 0.0;
        }
        let oldest = self.mids.front().copied().unwrap_or_default();
        let newest = self.mids.back().copied().unwrap_or_default();
        if oldest.is_zero() {
            return 0.0;
        }
        ((newest - oldest) / oldest).to_f64().unwrap_or(0.0)
    }

    /// Classify the regime. `circuit_frozen` forces chaos regardless of
    /// volatility.
    pub fn classify(&mut self, circuit_frozen: bool) -> RegimeDecision {
        let vol = self.ewma_vol();
        let momentum = self.momentum();

        let raw = if circuit_frozen || vol > self.config.chaos_vol {
            Regime::Chaos
        } else if momentum > self.config.trend_threshold {
            Regime::TrendingUp
        } else if momentum < -self.config.trend_threshold {
            Regime::TrendingDown
        } else {
            Regime::RangeBound
        };

        self.apply_hysteresis(raw);

        RegimeDecision {
            regime: self.current,
            limits: RegimeLimits::defaults_for(self.current),
            ewma_vol: vol,
            momentum,
        }
    }

    fn apply_hysteresis(&mut self, raw: Regime) {
        if raw == self.current {
            self.candidate = raw;
            self.candidate_streak = 0;
            return;
        }
        if raw == self.candidate {
            self.candidate_streak += 1;
        } else {
            self.candidate = raw;
            self.candidate_streak = 1;
        }
        if self.candidate_streak >= self.config.hysteresis_ticks {
            info!(from = %self.current, to = %raw, streak = self.candidate_streak, "Regime change");
            self.current = raw;
            self.candidate_streak = 0;
            self.regime_changes += 1;
        }
    }
}
