//! Risk configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Drawdown thresholds, circuit breaker and trailing stop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_warning_dd")]
    pub warning_dd_pct: Decimal,
    #[serde(default = "default_problem_dd")]
    pub problem_dd_pct: Decimal,
    #[serde(default = "default_critical_dd")]
    pub critical_dd_pct: Decimal,
    #[serde(default = "default_emergency_dd")]
    pub emergency_dd_pct: Decimal,

    /// Recovery requires dd below `critical * (1 - hysteresis)`.
    #[serde(default = "default_recovery_hysteresis")]
    pub recovery_hysteresis: Decimal,

    /// Tighten the critical threshold as the portfolio grows.
    #[serde(default = "default_true")]
    pub trailing_stop_enabled: bool,
    /// Bps of tightening per unit of growth above the baseline.
    #[serde(default = "default_trailing_tighten")]
    pub trailing_tighten_pct: Decimal,
    /// The critical threshold never tightens below this.
    #[serde(default = "default_trailing_floor")]
    pub trailing_floor_pct: Decimal,

    /// Circuit breaker window for the velocity measurement.
    #[serde(default = "default_velocity_window_sec")]
    pub velocity_window_sec: u64,
    /// Absolute price move over the window that freezes trading.
    #[serde(default = "default_freeze_pct")]
    pub velocity_freeze_pct: Decimal,
    /// Minimum frozen time before an unfreeze is considered.
    #[serde(default = "default_cooldown_sec")]
    pub velocity_cooldown_sec: u64,
}

fn default_warning_dd() -> Decimal {
    dec!(0.05)
}
fn default_problem_dd() -> Decimal {
    dec!(0.10)
}
fn default_critical_dd() -> Decimal {
    dec!(0.15)
}
fn default_emergency_dd() -> Decimal {
    dec!(0.20)
}
fn default_recovery_hysteresis() -> Decimal {
    dec!(0.10)
}
fn default_true() -> bool {
    true
}
fn default_trailing_tighten() -> Decimal {
    dec!(0.02)
}
fn default_trailing_floor() -> Decimal {
    dec!(0.075)
}
fn default_velocity_window_sec() -> u64 {
    60
}
fn default_freeze_pct() -> Decimal {
    dec!(0.03)
}
fn default_cooldown_sec() -> u64 {
    30
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            warning_dd_pct: default_warning_dd(),
            problem_dd_pct: default_problem_dd(),
            critical_dd_pct: default_critical_dd(),
            emergency_dd_pct: default_emergency_dd(),
            recovery_hysteresis: default_recovery_hysteresis(),
            trailing_stop_enabled: true,
            trailing_tighten_pct: default_trailing_tighten(),
            trailing_floor_pct: default_trailing_floor(),
            velocity_window_sec: default_velocity_window_sec(),
            velocity_freeze_pct: default_freeze_pct(),
            velocity_cooldown_sec: default_cooldown_sec(),
        }
    }
}
