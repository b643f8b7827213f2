//! Tax agent — veto gate for sell decisions under §23 EStG.
//!
//! Priority hierarchy: Tax > Risk > Alpha. The agent evaluates every
//! sell request against the ledger and returns one of:
//!   - `Allow`: tax-free lots cover it, or the year stays within the
//!     Freigrenze
//!   - `AllowPartial`: only part of the quantity is safe to sell
//!   - `Veto`: the sell would create avoidable tax liability
//!   - `AllowAll`: emergency drawdown override, taxes accepted
//!
//! Buys are never vetoed here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use steuergrid_core::{Price, Qty, TaxDecision, BTC_LOT_STEP};

use crate::ledger::FifoLedger;

/// Tax agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxAgentConfig {
    /// §23 EStG holding period in days.
    #[serde(default = "default_holding_period_days")]
    pub holding_period_days: i64,

    /// Lots aged at least this many days (but not yet free) are
    /// protected from disposal and harvesting.
    #[serde(default = "default_near_threshold_days")]
    pub near_threshold_days: i64,

    /// Annual Freigrenze. All-or-nothing: a year whose taxable net
    /// exceeds this by any amount is fully taxable.
    #[serde(default = "default_annual_exemption_eur")]
    pub annual_exemption_eur: Decimal,

    /// Portfolio drawdown at which the veto is overridden entirely.
    #[serde(default = "default_emergency_dd_pct")]
    pub emergency_dd_override_pct: Decimal,

    /// Enable tax-loss harvest recommendations.
    #[serde(default = "default_true")]
    pub harvest_enabled: bool,

    /// Ignore underwater lots with losses smaller than this.
    #[serde(default = "default_harvest_min_loss_eur")]
    pub harvest_min_loss_eur: Decimal,

    /// Maximum harvest recommendations per call.
    #[serde(default = "default_harvest_max_per_day")]
    pub harvest_max_per_day: usize,

    /// Harvest until the projected net taxable figure reaches this.
    #[serde(default = "default_harvest_target_net_eur")]
    pub harvest_target_net_eur: Decimal,
}

fn default_holding_period_days() -> i64 {
    365
}
fn default_near_threshold_days() -> i64 {
    330
}
fn default_annual_exemption_eur() -> Decimal {
    dec!(1000)
}
fn default_emergency_dd_pct() -> Decimal {
    dec!(0.20)
}
fn default_true() -> bool {
    true
}
fn default_harvest_min_loss_eur() -> Decimal {
    dec!(50)
}
fn default_harvest_max_per_day() -> usize {
    3
}
fn default_harvest_target_net_eur() -> Decimal {
    dec!(800)
}

impl Default for TaxAgentConfig {
    fn default() -> Self {
        Self {
            holding_period_days: default_holding_period_days(),
            near_threshold_days: default_near_threshold_days(),
            annual_exemption_eur: default_annual_exemption_eur(),
            emergency_dd_override_pct: default_emergency_dd_pct(),
            harvest_enabled: true,
            harvest_min_loss_eur: default_harvest_min_loss_eur(),
            harvest_max_per_day: default_harvest_max_per_day(),
            harvest_target_net_eur: default_harvest_target_net_eur(),
        }
    }
}

/// Result of a sell evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellEvaluation {
    pub decision: TaxDecision,
    pub allowed_qty: Qty,
    /// Taxable EUR gain the allowed quantity is projected to realize.
    pub projected_taxable_gain_eur: Decimal,
    pub reason: String,
    pub days_until_next_free: Option<i64>,
}

/// A lot recommended for tax-loss harvesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestRecommendation {
    pub lot_id: Uuid,
    pub qty: Qty,
    pub estimated_loss_eur: Decimal,
    pub days_held: i64,
}

/// Evaluates sell decisions against the FIFO ledger. Stateless apart
/// from configuration; the ledger is passed read-only per call.
#[derive(Debug, Clone, Default)]
pub struct TaxAgent {
    config: TaxAgentConfig,
}

impl TaxAgent {
    #[must_use]
    pub fn new(config: TaxAgentConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &TaxAgentConfig {
        &self.config
    }

    /// Evaluate a sell of `qty` BTC at `current_price`.
    ///
    /// Order of checks: emergency override, full tax-free coverage,
    /// Freigrenze simulation over non-protected taxable lots, partial
    /// sizing, veto.
    pub fn evaluate_sell(
        &self,
        ledger: &FifoLedger,
        qty: Qty,
        current_price: Price,
        eur_usd_rate: Decimal,
        drawdown_pct: Decimal,
        now: DateTime<Utc>,
    ) -> SellEvaluation {
        use chrono::Datelike;
        let days_until = ledger.days_until_next_free(now);

        if drawdown_pct >= self.config.emergency_dd_override_pct {
            let projected = self.simulate_gain(ledger, qty, current_price, eur_usd_rate, now, false);
            warn!(
                drawdown = %drawdown_pct,
                threshold = %self.config.emergency_dd_override_pct,
                projected_gain_eur = %projected.taxable_gain_eur,
                "Tax OVERRIDE: emergency drawdown, taxable events will be recorded"
            );
            return SellEvaluation {
                decision: TaxDecision::AllowAll,
                allowed_qty: qty,
                projected_taxable_gain_eur: projected.taxable_gain_eur,
                reason: format!("emergency drawdown override ({drawdown_pct})"),
                days_until_next_free: days_until,
            };
        }

        let total = ledger.total_btc(now);
        if total.is_zero() {
            return SellEvaluation {
                decision: TaxDecision::Veto,
                allowed_qty: Qty::ZERO,
                projected_taxable_gain_eur: Decimal::ZERO,
                reason: "no BTC in ledger".to_string(),
                days_until_next_free: days_until,
            };
        }

        let tax_free = ledger.tax_free_btc(now);
        if tax_free.inner() >= qty.inner() {
            info!(qty = %qty, tax_free = %tax_free, "Tax ALLOW: covered by tax-free lots");
            return SellEvaluation {
                decision: TaxDecision::Allow,
                allowed_qty: qty,
                projected_taxable_gain_eur: Decimal::ZERO,
                reason: "fully covered by tax-free lots".to_string(),
                days_until_next_free: days_until,
            };
        }

        // Simulate FIFO consumption, excluding near-threshold lots from
        // the taxable supply.
        let sim = self.simulate_gain(ledger, qty, current_price, eur_usd_rate, now, true);
        let ytd = ledger.ytd_realized_gain_eur(now.year());

        if sim.consumed.inner() >= qty.inner()
            && ytd + sim.taxable_gain_eur <= self.config.annual_exemption_eur
        {
            info!(
                qty = %qty,
                ytd = %ytd,
                projected = %sim.taxable_gain_eur,
                "Tax ALLOW: within Freigrenze"
            );
            return SellEvaluation {
                decision: TaxDecision::Allow,
                allowed_qty: qty,
                projected_taxable_gain_eur: sim.taxable_gain_eur,
                reason: "within annual Freigrenze".to_string(),
                days_until_next_free: days_until,
            };
        }

        // Partial: the largest quantity that keeps the year strictly
        // under the exemption. Crossing it by a cent would retroactively
        // tax the entire year's gains.
        let (allowed, partial_gain) =
            self.max_partial_qty(ledger, qty, current_price, eur_usd_rate, ytd, now);
        if allowed.is_positive() {
            info!(
                requested = %qty,
                allowed = %allowed,
                projected = %partial_gain,
                "Tax ALLOW_PARTIAL"
            );
            return SellEvaluation {
                decision: TaxDecision::AllowPartial,
                allowed_qty: allowed,
                projected_taxable_gain_eur: partial_gain,
                reason: format!("{allowed} of {qty} BTC sellable within Freigrenze"),
                days_until_next_free: days_until,
            };
        }

        info!(qty = %qty, total = %total, "Tax VETO");
        SellEvaluation {
            decision: TaxDecision::Veto,
            allowed_qty: Qty::ZERO,
            projected_taxable_gain_eur: Decimal::ZERO,
            reason: "all BTC tax-locked or Freigrenze exhausted".to_string(),
            days_until_next_free: days_until,
        }
    }

    /// Fraction of holdings sellable tax-free, clamped to [0, 1].
    #[must_use]
    pub fn sellable_ratio(&self, ledger: &FifoLedger, now: DateTime<Utc>) -> Decimal {
        let total = ledger.total_btc(now);
        if total.is_zero() {
            return Decimal::ZERO;
        }
        (ledger.tax_free_btc(now).inner() / total.inner())
            .clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Sell-side level scaling derived from the sellable ratio:
    /// >= 0.8 full sell side, 0.5..0.8 -> 60%, 0.2..0.5 -> 20%,
    /// below 0.2 buy-only.
    #[must_use]
    pub fn sell_level_fraction(&self, ledger: &FifoLedger, now: DateTime<Utc>) -> Decimal {
        let ratio = self.sellable_ratio(ledger, now);
        if ratio >= dec!(0.8) {
            Decimal::ONE
        } else if ratio >= dec!(0.5) {
            dec!(0.6)
        } else if ratio >= dec!(0.2) {
            dec!(0.2)
        } else {
            Decimal::ZERO
        }
    }

    /// True when holdings exist but none can be sold tax-free. Feeds
    /// the risk manager's TAX_LOCK pause state.
    #[must_use]
    pub fn is_tax_locked(&self, ledger: &FifoLedger, now: DateTime<Utc>) -> bool {
        ledger.tax_free_btc(now).is_zero() && ledger.total_btc(now).is_positive()
    }

    /// Recommend underwater lots to sell against realized gains.
    ///
    /// Only active when the year has net taxable gains above the
    /// harvest target; near-threshold lots are never harvested.
    #[must_use]
    pub fn recommend_harvest(
        &self,
        ledger: &FifoLedger,
        current_price: Price,
        eur_usd_rate: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<HarvestRecommendation> {
        use chrono::Datelike;
        if !self.config.harvest_enabled {
            return Vec::new();
        }
        let ytd = ledger.ytd_realized_gain_eur(now.year());
        if ytd <= Decimal::ZERO || ytd <= self.config.harvest_target_net_eur {
            return Vec::new();
        }

        let underwater = ledger.underwater_lots(
            current_price,
            eur_usd_rate,
            self.config.near_threshold_days,
            now,
        );

        let mut out = Vec::new();
        let mut projected = ytd;
        for (lot, loss) in underwater {
            if out.len() >= self.config.harvest_max_per_day {
                break;
            }
            if loss.abs() < self.config.harvest_min_loss_eur {
                continue;
            }
            if projected + loss < Decimal::ZERO {
                // Would overshoot into a net loss year.
                continue;
            }
            projected += loss;
            out.push(HarvestRecommendation {
                lot_id: lot.lot_id,
                qty: lot.remaining_qty_btc,
                estimated_loss_eur: loss,
                days_held: lot.age_days(now),
            });
            if projected <= self.config.harvest_target_net_eur {
                break;
            }
        }

        if !out.is_empty() {
            info!(
                lots = out.len(),
                ytd = %ytd,
                projected = %projected,
                "Tax-loss harvest recommended"
            );
        }
        out
    }

    fn simulate_gain(
        &self,
        ledger: &FifoLedger,
        qty: Qty,
        current_price: Price,
        eur_usd_rate: Decimal,
        now: DateTime<Utc>,
        exclude_near_threshold: bool,
    ) -> FifoSimulation {
        let mut remaining = qty.inner();
        let mut taxable_gain = Decimal::ZERO;
        let mut consumed = Decimal::ZERO;

        for lot in ledger.open_lots() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let tax_free = lot.is_tax_free(now);
            if !tax_free
                && exclude_near_threshold
                && lot.age_days(now) >= self.config.near_threshold_days
            {
                continue;
            }
            let portion = lot.remaining_qty_btc.inner().min(remaining);
            if !tax_free {
                let proceeds_eur = portion * current_price.inner() / eur_usd_rate;
                let basis_eur = portion * lot.cost_basis_per_btc_eur();
                taxable_gain += proceeds_eur - basis_eur;
            }
            consumed += portion;
            remaining -= portion;
        }

        FifoSimulation {
            consumed: Qty::new(consumed),
            taxable_gain_eur: taxable_gain,
        }
    }

    /// Largest quantity keeping `ytd + projected` strictly below the
    /// exemption (a one-cent margin under it).
    fn max_partial_qty(
        &self,
        ledger: &FifoLedger,
        qty: Qty,
        current_price: Price,
        eur_usd_rate: Decimal,
        ytd: Decimal,
        now: DateTime<Utc>,
    ) -> (Qty, Decimal) {
        let strict_cap = self.config.annual_exemption_eur - dec!(0.01);
        let mut running = ytd;
        let mut allowed = Decimal::ZERO;
        let mut remaining = qty.inner();

        for lot in ledger.open_lots() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let tax_free = lot.is_tax_free(now);
            if !tax_free && lot.age_days(now) >= self.config.near_threshold_days {
                continue;
            }
            let portion = lot.remaining_qty_btc.inner().min(remaining);
            if tax_free {
                allowed += portion;
                remaining -= portion;
                continue;
            }

            let gain_per_btc = current_price.inner() / eur_usd_rate - lot.cost_basis_per_btc_eur();
            let lot_gain = portion * gain_per_btc;
            if running + lot_gain <= strict_cap {
                running += lot_gain;
                allowed += portion;
                remaining -= portion;
            } else if gain_per_btc > Decimal::ZERO {
                let headroom = strict_cap - running;
                if headroom > Decimal::ZERO {
                    let fraction = Qty::new(headroom / gain_per_btc)
                        .floor_to_lot(BTC_LOT_STEP)
                        .inner()
                        .min(portion);
                    if fraction > Decimal::ZERO {
                        running += fraction * gain_per_btc;
                        allowed += fraction;
                    }
                }
                break;
            } else {
                break;
            }
        }

        (Qty::new(allowed), running - ytd)
    }
}

#[derive(Debug)]
struct FifoSimulation {
    consumed: Qty,
    taxable_gain_eur: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{buy, ts};
    use crate::ledger::FifoLedger;
    use std::collections::BTreeMap;

    fn agent() -> TaxAgent {
        TaxAgent::new(TaxAgentConfig::default())
    }

    fn ledger_with_ytd(ledger: FifoLedger, year: i32, ytd: Decimal) -> FifoLedger {
        let mut cache = BTreeMap::new();
        cache.insert(year, ytd);
        FifoLedger::from_parts(ledger.lots().to_vec(), ledger.disposals().to_vec(), cache)
    }

    #[test]
    fn test_haltefrist_unlock_allows() {
        // Lot bought 366 days ago: fully tax-free.
        let mut ledger = FifoLedger::new();
        ledger.record_buy(buy(dec!(0.02), dec!(40000), dec!(0), ts("2024-06-01 00:00:00")));
        let now = ts("2025-06-02 00:00:00");

        let eval = agent().evaluate_sell(
            &ledger,
            Qty::new(dec!(0.02)),
            Price::new(dec!(50000)),
            dec!(1.10),
            Decimal::ZERO,
            now,
        );
        assert_eq!(eval.decision, TaxDecision::Allow);
        assert_eq!(eval.allowed_qty.inner(), dec!(0.02));
        assert_eq!(eval.projected_taxable_gain_eur, Decimal::ZERO);
    }

    #[test]
    fn test_empty_ledger_vetoes() {
        let ledger = FifoLedger::new();
        let eval = agent().evaluate_sell(
            &ledger,
            Qty::new(dec!(0.01)),
            Price::new(dec!(50000)),
            dec!(1.10),
            Decimal::ZERO,
            ts("2025-06-01 00:00:00"),
        );
        assert_eq!(eval.decision, TaxDecision::Veto);
    }

    #[test]
    fn test_within_freigrenze_allows_taxable_sell() {
        // Young lot, gain 50 EUR, YTD 950 -> exactly 1000.00: still exempt.
        let mut ledger = FifoLedger::new();
        ledger.record_buy(crate::ledger::BuyFill {
            eur_usd_rate: Decimal::ONE,
            ..buy(dec!(0.01), dec!(50000), dec!(0), ts("2025-05-01 00:00:00"))
        });
        let ledger = ledger_with_ytd(ledger, 2025, dec!(950));
        let now = ts("2025-06-01 00:00:00");

        let eval = agent().evaluate_sell(
            &ledger,
            Qty::new(dec!(0.01)),
            Price::new(dec!(55000)),
            Decimal::ONE,
            Decimal::ZERO,
            now,
        );
        assert_eq!(eval.decision, TaxDecision::Allow);
        assert_eq!(eval.projected_taxable_gain_eur, dec!(50));
    }

    #[test]
    fn test_freigrenze_exceeded_allows_partial() {
        // Gain would be 60 EUR on YTD 950 -> 1010 > 1000. Partial keeps
        // the year strictly under the exemption.
        let mut ledger = FifoLedger::new();
        ledger.record_buy(crate::ledger::BuyFill {
            eur_usd_rate: Decimal::ONE,
            ..buy(dec!(0.01), dec!(50000), dec!(0), ts("2025-05-01 00:00:00"))
        });
        let ledger = ledger_with_ytd(ledger, 2025, dec!(950));
        let now = ts("2025-06-01 00:00:00");

        let eval = agent().evaluate_sell(
            &ledger,
            Qty::new(dec!(0.01)),
            Price::new(dec!(56000)),
            Decimal::ONE,
            Decimal::ZERO,
            now,
        );
        assert_eq!(eval.decision, TaxDecision::AllowPartial);
        assert!(eval.allowed_qty.is_positive());
        assert!(eval.allowed_qty.inner() < dec!(0.01));
        // gain/BTC is 6000 EUR; the allowance is 49.99 EUR.
        assert!(dec!(950) + eval.projected_taxable_gain_eur <= dec!(999.99));
        let expected_qty = Qty::new(dec!(49.99) / dec!(6000)).floor_to_lot(BTC_LOT_STEP);
        assert_eq!(eval.allowed_qty, expected_qty);
    }

    #[test]
    fn test_near_threshold_lots_are_protected() {
        // Only lot is 340 days old: outside tax freedom, inside the
        // protection window. Veto rather than burn the Haltefrist.
        let mut ledger = FifoLedger::new();
        ledger.record_buy(buy(dec!(0.01), dec!(40000), dec!(0), ts("2024-07-01 00:00:00")));
        let ledger = ledger_with_ytd(ledger, 2025, dec!(2000));
        let now = ts("2025-06-06 00:00:00");

        let eval = agent().evaluate_sell(
            &ledger,
            Qty::new(dec!(0.01)),
            Price::new(dec!(60000)),
            dec!(1.10),
            Decimal::ZERO,
            now,
        );
        assert_eq!(eval.decision, TaxDecision::Veto);
    }

    #[test]
    fn test_emergency_override_allows_everything() {
        let mut ledger = FifoLedger::new();
        ledger.record_buy(buy(dec!(0.05), dec!(50000), dec!(0), ts("2025-05-01 00:00:00")));
        let now = ts("2025-06-01 00:00:00");

        let eval = agent().evaluate_sell(
            &ledger,
            Qty::new(dec!(0.05)),
            Price::new(dec!(40000)),
            dec!(1.10),
            dec!(0.21),
            now,
        );
        assert_eq!(eval.decision, TaxDecision::AllowAll);
        assert_eq!(eval.allowed_qty.inner(), dec!(0.05));
    }

    #[test]
    fn test_sellable_ratio_and_level_mapping() {
        let mut ledger = FifoLedger::new();
        // 0.06 free, 0.04 locked -> ratio 0.6 -> 60% of sell levels.
        ledger.record_buy(buy(dec!(0.06), dec!(30000), dec!(0), ts("2023-01-01 00:00:00")));
        ledger.record_buy(buy(dec!(0.04), dec!(50000), dec!(0), ts("2025-05-01 00:00:00")));
        let now = ts("2025-06-01 00:00:00");

        let a = agent();
        assert_eq!(a.sellable_ratio(&ledger, now), dec!(0.6));
        assert_eq!(a.sell_level_fraction(&ledger, now), dec!(0.6));
    }

    #[test]
    fn test_level_mapping_bands() {
        let a = agent();
        let now = ts("2025-06-01 00:00:00");

        let mut all_locked = FifoLedger::new();
        all_locked.record_buy(buy(dec!(0.01), dec!(50000), dec!(0), ts("2025-05-01 00:00:00")));
        assert_eq!(a.sell_level_fraction(&all_locked, now), Decimal::ZERO);
        assert!(a.is_tax_locked(&all_locked, now));

        let mut all_free = FifoLedger::new();
        all_free.record_buy(buy(dec!(0.01), dec!(30000), dec!(0), ts("2023-01-01 00:00:00")));
        assert_eq!(a.sell_level_fraction(&all_free, now), Decimal::ONE);
        assert!(!a.is_tax_locked(&all_free, now));
    }

    #[test]
    fn test_harvest_recommends_until_target() {
        let mut ledger = FifoLedger::new();
        // Underwater lots, all young and past the dust filter.
        ledger.record_buy(crate::ledger::BuyFill {
            eur_usd_rate: Decimal::ONE,
            ..buy(dec!(0.05), dec!(58000), dec!(0), ts("2025-05-01 00:00:00"))
        });
        ledger.record_buy(crate::ledger::BuyFill {
            eur_usd_rate: Decimal::ONE,
            ..buy(dec!(0.05), dec!(53000), dec!(0), ts("2025-05-02 00:00:00"))
        });
        let ledger = ledger_with_ytd(ledger, 2025, dec!(1200));
        let now = ts("2025-06-01 00:00:00");

        // At 50,000: losses of 400 and 150 EUR. 1200 - 400 = 800 hits
        // the target after the first lot.
        let recs = agent().recommend_harvest(&ledger, Price::new(dec!(50000)), Decimal::ONE, now);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].estimated_loss_eur, dec!(-400));
    }

    #[test]
    fn test_harvest_noop_without_gains_or_below_target() {
        let mut ledger = FifoLedger::new();
        ledger.record_buy(buy(dec!(0.05), dec!(60000), dec!(0), ts("2025-05-01 00:00:00")));
        let now = ts("2025-06-01 00:00:00");

        // No realized gains at all.
        assert!(agent()
            .recommend_harvest(&ledger, Price::new(dec!(50000)), dec!(1.10), now)
            .is_empty());

        // Gains present but already under the target.
        let ledger = ledger_with_ytd(ledger, 2025, dec!(500));
        assert!(agent()
            .recommend_harvest(&ledger, Price::new(dec!(50000)), dec!(1.10), now)
            .is_empty());
    }

    #[test]
    fn test_harvest_disabled() {
        let mut config = TaxAgentConfig::default();
        config.harvest_enabled = false;
        let a = TaxAgent::new(config);

        let mut ledger = FifoLedger::new();
        ledger.record_buy(buy(dec!(0.05), dec!(60000), dec!(0), ts("2025-05-01 00:00:00")));
        let ledger = ledger_with_ytd(ledger, 2025, dec!(2000));
        assert!(a
            .recommend_harvest(
                &ledger,
                Price::new(dec!(50000)),
                dec!(1.10),
                ts("2025-06-01 00:00:00")
            )
            .is_empty());
    }
}
