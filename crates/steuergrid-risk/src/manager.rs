//! Drawdown tracking and the pause state machine.
//!
//! The high-water mark only moves up with equity; market moves never
//! reduce it. Deposits and withdrawals shift it through `adjust_hwm` so
//! a tax payment does not read as a crash. Drawdown severity combines
//! with the tax lock into the engine's pause state:
//!
//!   Active + tax lock            -> TaxLock (buy-only)
//!   Active + dd >= critical      -> RiskPause (no trading)
//!   TaxLock + dd >= critical     -> DualLock (full stop)
//!   any + dd >= emergency        -> EmergencySell (tax overridden)
//!   recovery below critical * (1 - hysteresis) returns to the prior
//!   non-risk state.

use rust_decimal::Decimal;
use tracing::{info, warn};

use steuergrid_core::PauseState;

use crate::config::RiskConfig;

/// Drawdown severity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DrawdownLevel {
    Healthy,
    Warning,
    Problem,
    Critical,
    Emergency,
}

/// Snapshot of the risk state after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskSnapshot {
    pub equity_usd: Decimal,
    pub high_water_mark_usd: Decimal,
    pub drawdown_pct: Decimal,
    pub level: DrawdownLevel,
    pub pause: PauseState,
}

/// Portfolio risk manager.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    hwm: Decimal,
    baseline: Decimal,
    equity: Decimal,
    tax_locked: bool,
    pause: PauseState,
    pub risk_pauses: u64,
    pub emergency_overrides: u64,
}

impl RiskManager {
    #[must_use]
    pub fn new(config: RiskConfig, initial_equity_usd: Decimal) -> Self {
        Self {
            config,
            hwm: initial_equity_usd,
            baseline: initial_equity_usd,
            equity: initial_equity_usd,
            tax_locked: false,
            pause: PauseState::Active,
            risk_pauses: 0,
            emergency_overrides: 0,
        }
    }

    #[must_use]
    pub fn pause(&self) -> PauseState {
        self.pause
    }

    #[must_use]
    pub fn high_water_mark(&self) -> Decimal {
        self.hwm
    }

    #[must_use]
    pub fn drawdown_pct(&self) -> Decimal {
        if self.hwm <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.hwm - self.equity) / self.hwm
    }

    /// Effective critical threshold after the trailing stop. Growth
    /// above the baseline tightens it toward the floor.
    #[must_use]
    pub fn effective_critical_pct(&self) -> Decimal {
        if !self.config.trailing_stop_enabled || self.baseline <= Decimal::ZERO {
            return self.config.critical_dd_pct;
        }
        let growth = (self.hwm - self.baseline) / self.baseline;
        if growth <= Decimal::ZERO {
            return self.config.critical_dd_pct;
        }
        (self.config.critical_dd_pct - growth * self.config.trailing_tighten_pct)
            .max(self.config.trailing_floor_pct)
    }

    /// Shift the HWM (and trailing baseline) for an external deposit or
    /// withdrawal, preventing spurious drawdown readings.
    pub fn adjust_hwm(&mut self, delta_usd: Decimal) {
        let old = self.hwm;
        self.hwm = (self.hwm + delta_usd).max(Decimal::ZERO);
        self.baseline = (self.baseline + delta_usd).max(Decimal::ZERO);
        info!(old = %old, new = %self.hwm, delta = %delta_usd, "HWM adjusted");
    }

    /// Update the tax lock flag from the tax agent and reconcile the
    /// pause state. Returns a transition if one occurred.
    pub fn set_tax_locked(&mut self, locked: bool) -> Option<(PauseState, PauseState)> {
        self.tax_locked = locked;
        self.reconcile()
    }

    /// Force a pause from outside the drawdown path (ledger mismatch,
    /// book desync). Cleared only by recovery or operator action.
    pub fn force_pause(&mut self) -> Option<(PauseState, PauseState)> {
        let from = self.pause;
        if from != PauseState::RiskPause {
            self.risk_pauses += 1;
            self.pause = PauseState::RiskPause;
            warn!(%from, "Forced RISK_PAUSE");
            return Some((from, self.pause));
        }
        None
    }

    /// Operator acknowledgement: return to the tax-appropriate active
    /// state regardless of the current pause.
    pub fn operator_resume(&mut self) -> Option<(PauseState, PauseState)> {
        let from = self.pause;
        self.pause = if self.tax_locked {
            PauseState::TaxLock
        } else {
            PauseState::Active
        };
        (from != self.pause).then(|| {
            warn!(%from, to = %self.pause, "Operator resume");
            (from, self.pause)
        })
    }

    /// Update equity, refresh the HWM, classify drawdown and advance
    /// the pause machine. Returns the snapshot and any transition.
    pub fn update_equity(
        &mut self,
        equity_usd: Decimal,
    ) -> (RiskSnapshot, Option<(PauseState, PauseState)>) {
        self.equity = equity_usd;
        if equity_usd > self.hwm {
            self.hwm = equity_usd;
        }
        let transition = self.reconcile();
        (
            RiskSnapshot {
                equity_usd,
                high_water_mark_usd: self.hwm,
                drawdown_pct: self.drawdown_pct(),
                level: self.classify(self.drawdown_pct()),
                pause: self.pause,
            },
            transition,
        )
    }

    #[must_use]
    pub fn classify(&self, dd: Decimal) -> DrawdownLevel {
        if dd >= self.config.emergency_dd_pct {
            DrawdownLevel::Emergency
        } else if dd >= self.effective_critical_pct() {
            DrawdownLevel::Critical
        } else if dd >= self.config.problem_dd_pct {
            DrawdownLevel::Problem
        } else if dd >= self.config.warning_dd_pct {
            DrawdownLevel::Warning
        } else {
            DrawdownLevel::Healthy
        }
    }

    fn reconcile(&mut self) -> Option<(PauseState, PauseState)> {
        let from = self.pause;
        let dd = self.drawdown_pct();
        let level = self.classify(dd);

        let to = match level {
            DrawdownLevel::Emergency => PauseState::EmergencySell,
            DrawdownLevel::Critical => {
                if self.tax_locked {
                    PauseState::DualLock
                } else {
                    PauseState::RiskPause
                }
            }
            _ => {
                let in_risk_state = matches!(
                    from,
                    PauseState::RiskPause | PauseState::DualLock | PauseState::EmergencySell
                );
                let recovered = dd
                    < self.effective_critical_pct() * (Decimal::ONE - self.config.recovery_hysteresis);
                if in_risk_state && !recovered {
                    from
                } else if self.tax_locked {
                    PauseState::TaxLock
                } else {
                    PauseState::Active
                }
            }
        };

        if to == from {
            return None;
        }
        match to {
            PauseState::RiskPause | PauseState::DualLock => self.risk_pauses += 1,
            PauseState::EmergencySell => self.emergency_overrides += 1,
            _ => {}
        }
        warn!(%from, %to, drawdown = %dd, "Pause transition");
        self.pause = to;
        Some((from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> RiskManager {
        let config = RiskConfig {
            trailing_stop_enabled: false,
            ..RiskConfig::default()
        };
        RiskManager::new(config, dec!(10000))
    }

    #[test]
    fn test_hwm_only_rises_on_market_moves() {
        let mut rm = manager();
        rm.update_equity(dec!(11000));
        assert_eq!(rm.high_water_mark(), dec!(11000));
        rm.update_equity(dec!(9000));
        assert_eq!(rm.high_water_mark(), dec!(11000));
    }

    #[test]
    fn test_adjust_hwm_for_withdrawal() {
        let mut rm = manager();
        // Withdraw 3000 for the Finanzamt; without the adjustment this
        // would read as a 30% drawdown and freeze the bot.
        rm.adjust_hwm(dec!(-3000));
        let (snap, _) = rm.update_equity(dec!(7000));
        assert_eq!(snap.drawdown_pct, Decimal::ZERO);
        assert_eq!(snap.pause, PauseState::Active);
    }

    #[test]
    fn test_drawdown_classification_bands() {
        let rm = manager();
        assert_eq!(rm.classify(dec!(0.04)), DrawdownLevel::Healthy);
        assert_eq!(rm.classify(dec!(0.05)), DrawdownLevel::Warning);
        assert_eq!(rm.classify(dec!(0.10)), DrawdownLevel::Problem);
        assert_eq!(rm.classify(dec!(0.15)), DrawdownLevel::Critical);
        assert_eq!(rm.classify(dec!(0.20)), DrawdownLevel::Emergency);
    }

    #[test]
    fn test_critical_enters_risk_pause() {
        let mut rm = manager();
        let (snap, transition) = rm.update_equity(dec!(8400));
        assert_eq!(snap.level, DrawdownLevel::Critical);
        assert_eq!(snap.pause, PauseState::RiskPause);
        assert_eq!(transition, Some((PauseState::Active, PauseState::RiskPause)));
        assert_eq!(rm.risk_pauses, 1);
    }

    #[test]
    fn test_tax_lock_and_dual_lock() {
        let mut rm = manager();
        rm.set_tax_locked(true);
        assert_eq!(rm.pause(), PauseState::TaxLock);

        rm.update_equity(dec!(8400));
        assert_eq!(rm.pause(), PauseState::DualLock);
    }

    #[test]
    fn test_emergency_overrides_everything() {
        let mut rm = manager();
        rm.set_tax_locked(true);
        let (snap, _) = rm.update_equity(dec!(7900));
        assert_eq!(snap.level, DrawdownLevel::Emergency);
        assert_eq!(snap.pause, PauseState::EmergencySell);
        assert_eq!(rm.emergency_overrides, 1);
    }

    #[test]
    fn test_recovery_requires_hysteresis() {
        let mut rm = manager();
        rm.update_equity(dec!(8400));
        assert_eq!(rm.pause(), PauseState::RiskPause);

        // 14% drawdown: below critical but above the recovery bound
        // (0.15 * 0.9 = 0.135).
        rm.update_equity(dec!(8600));
        assert_eq!(rm.pause(), PauseState::RiskPause);

        // 13% drawdown clears the bound.
        rm.update_equity(dec!(8700));
        assert_eq!(rm.pause(), PauseState::Active);
    }

    #[test]
    fn test_recovery_returns_to_tax_lock_when_locked() {
        let mut rm = manager();
        rm.set_tax_locked(true);
        rm.update_equity(dec!(8400));
        assert_eq!(rm.pause(), PauseState::DualLock);

        rm.update_equity(dec!(8700));
        assert_eq!(rm.pause(), PauseState::TaxLock);
    }

    #[test]
    fn test_trailing_stop_tightens_critical() {
        let config = RiskConfig::default();
        let mut rm = RiskManager::new(config, dec!(10000));
        assert_eq!(rm.effective_critical_pct(), dec!(0.15));

        // Portfolio doubles: growth 1.0 tightens by 0.02.
        rm.update_equity(dec!(20000));
        assert_eq!(rm.effective_critical_pct(), dec!(0.13));
    }

    #[test]
    fn test_trailing_stop_floor() {
        let config = RiskConfig::default();
        let mut rm = RiskManager::new(config, dec!(10000));
        // 10x growth would tighten past the floor.
        rm.update_equity(dec!(100000));
        assert_eq!(rm.effective_critical_pct(), dec!(0.075));
    }

    #[test]
    fn test_force_pause_and_operator_resume() {
        let mut rm = manager();
        let t = rm.force_pause();
        assert_eq!(t, Some((PauseState::Active, PauseState::RiskPause)));
        // Equity is fine but the pause holds until recovery math or an
        // operator clears it.
        assert!(rm.operator_resume().is_some());
        assert_eq!(rm.pause(), PauseState::Active);
    }
}
