//! Quoting configuration blocks.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use steuergrid_core::Regime;

/// Per-regime allocation limits and grid shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeLimits {
    pub btc_target_pct: Decimal,
    pub btc_min_pct: Decimal,
    pub btc_max_pct: Decimal,
    pub grid_levels: u32,
    pub order_size_scale: Decimal,
    /// Whether the optional signal engine may trade in this regime.
    #[serde(default)]
    pub signal_enabled: bool,
}

impl RegimeLimits {
    /// Default allocation bands per regime.
    #[must_use]
    pub fn defaults_for(regime: Regime) -> Self {
        match regime {
            Regime::RangeBound => Self {
                btc_target_pct: dec!(0.50),
                btc_min_pct: dec!(0.40),
                btc_max_pct: dec!(0.60),
                grid_levels: 5,
                order_size_scale: dec!(1.0),
                signal_enabled: false,
            },
            Regime::TrendingUp => Self {
                btc_target_pct: dec!(0.70),
                btc_min_pct: dec!(0.55),
                btc_max_pct: dec!(0.80),
                grid_levels: 5,
                order_size_scale: dec!(0.75),
                signal_enabled: true,
            },
            Regime::TrendingDown => Self {
                btc_target_pct: dec!(0.30),
                btc_min_pct: dec!(0.15),
                btc_max_pct: dec!(0.40),
                grid_levels: 3,
                order_size_scale: dec!(0.75),
                signal_enabled: false,
            },
            Regime::Chaos => Self {
                btc_target_pct: dec!(0.00),
                btc_min_pct: dec!(0.00),
                btc_max_pct: dec!(0.05),
                grid_levels: 0,
                order_size_scale: dec!(0.5),
                signal_enabled: false,
            },
        }
    }
}

/// Regime router thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeRouterConfig {
    /// EWMA span for tick-return variance.
    #[serde(default = "default_ewma_span")]
    pub ewma_span: u32,
    /// Per-tick volatility above which the market is chaos.
    #[serde(default = "default_chaos_vol")]
    pub chaos_vol: f64,
    /// Momentum magnitude marking a trend.
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    /// Ring length (ticks) for the momentum lookback.
    #[serde(default = "default_momentum_window")]
    pub momentum_window: usize,
    /// Trade prints retained for VWAP.
    #[serde(default = "default_vwap_window")]
    pub vwap_window: usize,
    /// Consecutive ticks a candidate regime must persist before the
    /// router switches.
    #[serde(default = "default_hysteresis_ticks")]
    pub hysteresis_ticks: u32,
}

fn default_ewma_span() -> u32 {
    20
}
fn default_chaos_vol() -> f64 {
    0.008
}
fn default_trend_threshold() -> f64 {
    0.015
}
fn default_momentum_window() -> usize {
    60
}
fn default_vwap_window() -> usize {
    500
}
fn default_hysteresis_ticks() -> u32 {
    5
}

impl Default for RegimeRouterConfig {
    fn default() -> Self {
        Self {
            ewma_span: default_ewma_span(),
            chaos_vol: default_chaos_vol(),
            trend_threshold: default_trend_threshold(),
            momentum_window: default_momentum_window(),
            vwap_window: default_vwap_window(),
            hysteresis_ticks: default_hysteresis_ticks(),
        }
    }
}

/// Bollinger + ATR spacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingConfig {
    #[serde(default = "default_bb_window")]
    pub window: usize,
    #[serde(default = "default_bb_multiplier")]
    pub multiplier: Decimal,
    #[serde(default = "default_spacing_scale")]
    pub spacing_scale: Decimal,
    #[serde(default = "default_min_spacing_bps")]
    pub min_spacing_bps: Decimal,
    #[serde(default = "default_max_spacing_bps")]
    pub max_spacing_bps: Decimal,
    #[serde(default = "default_true")]
    pub atr_enabled: bool,
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,
    #[serde(default = "default_atr_weight")]
    pub atr_weight: Decimal,
}

fn default_bb_window() -> usize {
    20
}
fn default_bb_multiplier() -> Decimal {
    dec!(2.0)
}
fn default_spacing_scale() -> Decimal {
    dec!(0.5)
}
fn default_min_spacing_bps() -> Decimal {
    dec!(15)
}
fn default_max_spacing_bps() -> Decimal {
    dec!(200)
}
fn default_true() -> bool {
    true
}
fn default_atr_window() -> usize {
    14
}
fn default_atr_weight() -> Decimal {
    dec!(0.3)
}

impl Default for SpacingConfig {
    fn default() -> Self {
        Self {
            window: default_bb_window(),
            multiplier: default_bb_multiplier(),
            spacing_scale: default_spacing_scale(),
            min_spacing_bps: default_min_spacing_bps(),
            max_spacing_bps: default_max_spacing_bps(),
            atr_enabled: true,
            atr_window: default_atr_window(),
            atr_weight: default_atr_weight(),
        }
    }
}

/// Allocation-deviation skew configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkewConfig {
    /// Bps of skew per percentage point of allocation deviation.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: Decimal,
    #[serde(default = "default_max_skew_bps")]
    pub max_skew_bps: Decimal,
}

fn default_sensitivity() -> Decimal {
    dec!(2.0)
}
fn default_max_skew_bps() -> Decimal {
    dec!(30)
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            max_skew_bps: default_max_skew_bps(),
        }
    }
}

/// Grid engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_order_size_usd")]
    pub order_size_usd: Decimal,
    /// Venue price tick.
    #[serde(default = "default_price_tick")]
    pub price_tick: Decimal,
    /// Venue minimum order quantity.
    #[serde(default = "default_min_order_btc")]
    pub min_order_btc: Decimal,
    /// Multiplicative (default) or additive level offsets.
    #[serde(default)]
    pub additive_spacing: bool,
    /// Fixed USD step between levels in additive mode.
    #[serde(default = "default_additive_step_usd")]
    pub additive_step_usd: Decimal,
    /// Cap of BTC equity that may be rebalanced in one tick. Note:
    /// at sub-second ticks this still permits large moves per second;
    /// operators are expected to configure lower (e.g. 0.01).
    #[serde(default = "default_per_tick_rebalance_pct")]
    pub per_tick_rebalance_pct: Decimal,
}

fn default_order_size_usd() -> Decimal {
    dec!(500)
}
fn default_price_tick() -> Decimal {
    dec!(0.1)
}
fn default_min_order_btc() -> Decimal {
    dec!(0.0001)
}
fn default_additive_step_usd() -> Decimal {
    dec!(50)
}
fn default_per_tick_rebalance_pct() -> Decimal {
    dec!(0.10)
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            order_size_usd: default_order_size_usd(),
            price_tick: default_price_tick(),
            min_order_btc: default_min_order_btc(),
            additive_spacing: false,
            additive_step_usd: default_additive_step_usd(),
            per_tick_rebalance_pct: default_per_tick_rebalance_pct(),
        }
    }
}
