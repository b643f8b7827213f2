//! FIFO-ordered ledger of BTC tax lots.
//!
//! Lots are kept ordered by purchase time (ties broken by lot id) and
//! every sell consumes from the oldest open lots first. Aggregates
//! (total, tax-free quantity) are cached and invalidated on mutation;
//! the tax-free cache additionally expires when the next lot crosses
//! its holding-period boundary.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use steuergrid_core::{LotSource, Price, Qty, Side};

use crate::error::{Result, TaxError};

/// §23 EStG holding period. A lot becomes tax-free at
/// `purchased_at + 365 days`, boundary inclusive.
pub const HOLDING_PERIOD_DAYS: i64 = 365;

#[inline]
fn holding_period() -> Duration {
    Duration::days(HOLDING_PERIOD_DAYS)
}

/// Lot lifecycle status. `Closed` iff `remaining_qty_btc` is zero;
/// a closed lot never resurrects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotStatus {
    #[default]
    Open,
    Partial,
    Closed,
}

/// A single BTC purchase lot for FIFO tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxLot {
    pub lot_id: Uuid,
    pub venue_order_id: String,
    pub venue_trade_id: String,
    #[serde(default)]
    pub source: LotSource,

    pub purchased_at: DateTime<Utc>,
    pub original_qty_btc: Qty,
    pub remaining_qty_btc: Qty,

    pub purchase_price_usd: Price,
    /// qty * price + fee, in USD.
    pub purchase_total_usd: Decimal,
    pub purchase_fee_usd: Decimal,

    pub purchase_price_eur: Decimal,
    pub purchase_total_eur: Decimal,
    pub eur_usd_rate_at_purchase: Decimal,

    #[serde(default)]
    pub status: LotStatus,
}

impl TaxLot {
    /// Instant at which this lot clears the holding period.
    #[must_use]
    pub fn tax_free_at(&self) -> DateTime<Utc> {
        self.purchased_at + holding_period()
    }

    /// Whether the lot is tax-free at `now` (boundary inclusive).
    #[must_use]
    pub fn is_tax_free(&self, now: DateTime<Utc>) -> bool {
        now >= self.tax_free_at()
    }

    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.purchased_at).num_days()
    }

    /// EUR cost basis per BTC of this lot.
    #[must_use]
    pub fn cost_basis_per_btc_eur(&self) -> Decimal {
        if self.original_qty_btc.is_zero() {
            return Decimal::ZERO;
        }
        self.purchase_total_eur / self.original_qty_btc.inner()
    }

    fn is_open(&self) -> bool {
        self.status != LotStatus::Closed
    }
}

/// A (partial) disposal of a single lot under FIFO. One sell fill can
/// produce several disposals when it crosses lot boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disposal {
    pub disposal_id: Uuid,
    pub lot_id: Uuid,
    pub disposed_at: DateTime<Utc>,

    pub qty_btc: Qty,
    pub sale_price_usd: Price,
    /// Proportional share of the fill's fee allocated to this disposal.
    pub sale_fee_usd_portion: Decimal,
    pub eur_usd_rate_at_sale: Decimal,

    pub proceeds_eur: Decimal,
    pub cost_basis_eur: Decimal,
    pub gain_loss_eur: Decimal,

    /// False iff the lot had cleared the holding period at disposal.
    pub is_taxable: bool,
    pub days_held: i64,

    pub venue_order_id: String,
    pub venue_trade_id: String,
}

/// A normalized buy fill entering the ledger.
#[derive(Debug, Clone)]
pub struct BuyFill {
    pub qty: Qty,
    pub price_usd: Price,
    pub fee_usd: Decimal,
    pub eur_usd_rate: Decimal,
    pub ts: DateTime<Utc>,
    pub venue_order_id: String,
    pub venue_trade_id: String,
    pub source: LotSource,
}

/// A normalized sell fill to be consumed against the ledger.
#[derive(Debug, Clone)]
pub struct SellFill {
    pub qty: Qty,
    pub price_usd: Price,
    pub fee_usd: Decimal,
    pub eur_usd_rate: Decimal,
    pub ts: DateTime<Utc>,
    pub venue_order_id: String,
    pub venue_trade_id: String,
}

#[derive(Debug, Default, Clone)]
struct AggregateCache {
    valid: bool,
    total_btc: Decimal,
    tax_free_btc: Decimal,
    /// When the next locked lot unlocks; the tax-free figure is stale
    /// from that instant even without a mutation.
    next_unlock: Option<DateTime<Utc>>,
}

/// FIFO-ordered ledger of all BTC lots and their disposals.
#[derive(Debug, Default)]
pub struct FifoLedger {
    lots: Vec<TaxLot>,
    disposals: Vec<Disposal>,
    ytd_cache: BTreeMap<i32, Decimal>,
    cache: Mutex<AggregateCache>,
}

impl FifoLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted parts. The YTD cache is
    /// recomputed from disposals when the stored cache is empty.
    #[must_use]
    pub fn from_parts(
        mut lots: Vec<TaxLot>,
        disposals: Vec<Disposal>,
        ytd_cache: BTreeMap<i32, Decimal>,
    ) -> Self {
        lots.sort_by(|a, b| {
            a.purchased_at
                .cmp(&b.purchased_at)
                .then(a.lot_id.cmp(&b.lot_id))
        });
        let ytd_cache = if ytd_cache.is_empty() {
            let mut rebuilt: BTreeMap<i32, Decimal> = BTreeMap::new();
            for d in disposals.iter().filter(|d| d.is_taxable) {
                use chrono::Datelike;
                *rebuilt.entry(d.disposed_at.year()).or_default() += d.gain_loss_eur;
            }
            rebuilt
        } else {
            ytd_cache
        };
        Self {
            lots,
            disposals,
            ytd_cache,
            cache: Mutex::new(AggregateCache::default()),
        }
    }

    #[must_use]
    pub fn lots(&self) -> &[TaxLot] {
        &self.lots
    }

    #[must_use]
    pub fn disposals(&self) -> &[Disposal] {
        &self.disposals
    }

    #[must_use]
    pub fn ytd_cache(&self) -> &BTreeMap<i32, Decimal> {
        &self.ytd_cache
    }

    pub fn open_lots(&self) -> impl Iterator<Item = &TaxLot> {
        self.lots.iter().filter(|l| l.is_open())
    }

    fn invalidate_cache(&mut self) {
        self.cache.lock().valid = false;
    }

    fn ensure_cache(&self, now: DateTime<Utc>) {
        let mut cache = self.cache.lock();
        let expired = cache.next_unlock.is_some_and(|t| now >= t);
        if cache.valid && !expired {
            return;
        }
        let mut total = Decimal::ZERO;
        let mut tax_free = Decimal::ZERO;
        let mut next_unlock: Option<DateTime<Utc>> = None;
        for lot in self.lots.iter().filter(|l| l.is_open()) {
            total += lot.remaining_qty_btc.inner();
            if lot.is_tax_free(now) {
                tax_free += lot.remaining_qty_btc.inner();
            } else {
                let unlock = lot.tax_free_at();
                next_unlock = Some(next_unlock.map_or(unlock, |u: DateTime<Utc>| u.min(unlock)));
            }
        }
        *cache = AggregateCache {
            valid: true,
            total_btc: total,
            tax_free_btc: tax_free,
            next_unlock,
        };
    }

    /// Total open BTC in the ledger.
    #[must_use]
    pub fn total_btc(&self, now: DateTime<Utc>) -> Qty {
        self.ensure_cache(now);
        Qty::new(self.cache.lock().total_btc)
    }

    /// Open BTC that has cleared the holding period at `now`.
    #[must_use]
    pub fn tax_free_btc(&self, now: DateTime<Utc>) -> Qty {
        self.ensure_cache(now);
        Qty::new(self.cache.lock().tax_free_btc)
    }

    /// Open BTC still inside the holding period.
    #[must_use]
    pub fn locked_btc(&self, now: DateTime<Utc>) -> Qty {
        self.total_btc(now) - self.tax_free_btc(now)
    }

    /// Days until the next locked lot unlocks. `None` when everything
    /// is already free (or the ledger is empty).
    #[must_use]
    pub fn days_until_next_free(&self, now: DateTime<Utc>) -> Option<i64> {
        self.lots
            .iter()
            .filter(|l| l.is_open() && !l.is_tax_free(now))
            .map(|l| (l.tax_free_at() - now).num_days().max(0))
            .min()
    }

    /// Open BTC aged within `[near_days, holding_period)` — approaching
    /// tax freedom and worth protecting from disposal.
    #[must_use]
    pub fn near_threshold_btc(&self, near_days: i64, now: DateTime<Utc>) -> Qty {
        let sum = self
            .lots
            .iter()
            .filter(|l| {
                l.is_open() && !l.is_tax_free(now) && l.age_days(now) >= near_days
            })
            .map(|l| l.remaining_qty_btc.inner())
            .sum();
        Qty::new(sum)
    }

    /// Record a buy fill as a new lot. EUR fields use the rate valid at
    /// the purchase date.
    pub fn record_buy(&mut self, fill: BuyFill) -> &TaxLot {
        let total_usd = fill.qty.notional(fill.price_usd) + fill.fee_usd;
        let lot = TaxLot {
            lot_id: Uuid::new_v4(),
            venue_order_id: fill.venue_order_id,
            venue_trade_id: fill.venue_trade_id,
            source: fill.source,
            purchased_at: fill.ts,
            original_qty_btc: fill.qty,
            remaining_qty_btc: fill.qty,
            purchase_price_usd: fill.price_usd,
            purchase_total_usd: total_usd,
            purchase_fee_usd: fill.fee_usd,
            purchase_price_eur: fill.price_usd.inner() / fill.eur_usd_rate,
            purchase_total_eur: total_usd / fill.eur_usd_rate,
            eur_usd_rate_at_purchase: fill.eur_usd_rate,
            status: LotStatus::Open,
        };
        let lot_id = lot.lot_id;
        info!(
            lot = %lot_id,
            qty = %fill.qty,
            price = %fill.price_usd,
            source = ?fill.source,
            "FIFO lot added"
        );
        self.lots.push(lot);
        self.lots.sort_by(|a, b| {
            a.purchased_at
                .cmp(&b.purchased_at)
                .then(a.lot_id.cmp(&b.lot_id))
        });
        self.invalidate_cache();
        self.lots
            .iter()
            .find(|l| l.lot_id == lot_id)
            .expect("lot just inserted")
    }

    /// Consume a sell fill against the oldest open lots. Returns one
    /// disposal per lot touched, in consumption (FIFO) order.
    ///
    /// Fails with [`TaxError::InsufficientLots`] when the fill exceeds
    /// the open quantity; the ledger is left untouched in that case.
    pub fn record_sell(&mut self, fill: SellFill) -> Result<Vec<Disposal>> {
        let available = self.total_btc(fill.ts);
        if fill.qty.inner() > available.inner() {
            return Err(TaxError::InsufficientLots {
                requested: fill.qty.inner(),
                available: available.inner(),
            });
        }

        let mut remaining = fill.qty.inner();
        let mut out: Vec<Disposal> = Vec::new();

        for lot in self.lots.iter_mut() {
            if remaining <= Decimal::ZERO {
                break;
            }
            if !lot.is_open() {
                continue;
            }

            let portion = lot.remaining_qty_btc.inner().min(remaining);
            let cost_proportion = portion / lot.original_qty_btc.inner();
            let cost_basis_eur = cost_proportion * lot.purchase_total_eur;

            let fee_portion = fill.fee_usd * portion / fill.qty.inner();
            let proceeds_usd = portion * fill.price_usd.inner() - fee_portion;
            let proceeds_eur = proceeds_usd / fill.eur_usd_rate;
            let gain_loss_eur = proceeds_eur - cost_basis_eur;

            let is_taxable = !lot.is_tax_free(fill.ts);
            let disposal = Disposal {
                disposal_id: Uuid::new_v4(),
                lot_id: lot.lot_id,
                disposed_at: fill.ts,
                qty_btc: Qty::new(portion),
                sale_price_usd: fill.price_usd,
                sale_fee_usd_portion: fee_portion,
                eur_usd_rate_at_sale: fill.eur_usd_rate,
                proceeds_eur,
                cost_basis_eur,
                gain_loss_eur,
                is_taxable,
                days_held: lot.age_days(fill.ts),
                venue_order_id: fill.venue_order_id.clone(),
                venue_trade_id: fill.venue_trade_id.clone(),
            };

            lot.remaining_qty_btc = Qty::new(lot.remaining_qty_btc.inner() - portion);
            lot.status = if lot.remaining_qty_btc.is_zero() {
                LotStatus::Closed
            } else {
                LotStatus::Partial
            };

            if is_taxable {
                use chrono::Datelike;
                *self.ytd_cache.entry(fill.ts.year()).or_default() += gain_loss_eur;
            }

            remaining -= portion;
            out.push(disposal);
        }

        self.disposals.extend(out.iter().cloned());
        self.invalidate_cache();

        let total_gain: Decimal = out.iter().map(|d| d.gain_loss_eur).sum();
        let taxable = out.iter().filter(|d| d.is_taxable).count();
        info!(
            qty = %fill.qty,
            price = %fill.price_usd,
            disposals = out.len(),
            taxable,
            gain_eur = %total_gain,
            "FIFO sell"
        );
        Ok(out)
    }

    /// Realized taxable gain/loss for a tax year, in EUR.
    #[must_use]
    pub fn ytd_realized_gain_eur(&self, year: i32) -> Decimal {
        self.ytd_cache.get(&year).copied().unwrap_or(Decimal::ZERO)
    }

    /// Open lots whose mark-to-market EUR value is under their cost
    /// basis, sorted largest loss first. Tax-free lots are excluded
    /// (selling them at a loss has no tax benefit) and so are lots
    /// within `near_days` of maturity.
    #[must_use]
    pub fn underwater_lots(
        &self,
        current_price: Price,
        eur_usd_rate: Decimal,
        near_days: i64,
        now: DateTime<Utc>,
    ) -> Vec<(&TaxLot, Decimal)> {
        let mut out: Vec<(&TaxLot, Decimal)> = Vec::new();
        for lot in self.open_lots() {
            if lot.is_tax_free(now) || lot.age_days(now) >= near_days {
                continue;
            }
            let value_eur = lot.remaining_qty_btc.notional(current_price) / eur_usd_rate;
            let basis_eur = (lot.remaining_qty_btc.inner() / lot.original_qty_btc.inner())
                * lot.purchase_total_eur;
            let unrealized = value_eur - basis_eur;
            if unrealized < Decimal::ZERO {
                out.push((lot, unrealized));
            }
        }
        out.sort_by(|a, b| a.1.cmp(&b.1));
        debug!(candidates = out.len(), "underwater lot scan");
        out
    }

    /// All disposals in a given tax year.
    pub fn disposals_in_year(&self, year: i32) -> impl Iterator<Item = &Disposal> {
        use chrono::Datelike;
        self.disposals
            .iter()
            .filter(move |d| d.disposed_at.year() == year)
    }

    /// Look up a lot by id (open or closed).
    #[must_use]
    pub fn lot(&self, lot_id: Uuid) -> Option<&TaxLot> {
        self.lots.iter().find(|l| l.lot_id == lot_id)
    }

    /// Normalized fill entry point used by the order manager.
    pub fn record_fill(
        &mut self,
        side: Side,
        fill: steuergrid_core::Fill,
        eur_usd_rate: Decimal,
        source: LotSource,
    ) -> Result<Vec<Disposal>> {
        match side {
            Side::Buy => {
                self.record_buy(BuyFill {
                    qty: fill.qty,
                    price_usd: fill.price,
                    fee_usd: fill.fee_usd,
                    eur_usd_rate,
                    ts: fill.ts,
                    venue_order_id: fill.order_id,
                    venue_trade_id: fill.trade_id,
                    source,
                });
                Ok(Vec::new())
            }
            Side::Sell => self.record_sell(SellFill {
                qty: fill.qty,
                price_usd: fill.price,
                fee_usd: fill.fee_usd,
                eur_usd_rate,
                ts: fill.ts,
                venue_order_id: fill.order_id,
                venue_trade_id: fill.trade_id,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn ts(s: &str) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .expect("valid test timestamp")
            .and_utc()
    }

    pub(crate) fn buy(qty: Decimal, price: Decimal, fee: Decimal, at: DateTime<Utc>) -> BuyFill {
        BuyFill {
            qty: Qty::new(qty),
            price_usd: Price::new(price),
            fee_usd: fee,
            eur_usd_rate: dec!(1.10),
            ts: at,
            venue_order_id: "O1".into(),
            venue_trade_id: "T1".into(),
            source: LotSource::Grid,
        }
    }

    pub(crate) fn sell(qty: Decimal, price: Decimal, fee: Decimal, at: DateTime<Utc>) -> SellFill {
        SellFill {
            qty: Qty::new(qty),
            price_usd: Price::new(price),
            fee_usd: fee,
            eur_usd_rate: dec!(1.10),
            ts: at,
            venue_order_id: "O2".into(),
            venue_trade_id: "T2".into(),
        }
    }

    #[test]
    fn test_buy_creates_open_lot() {
        let mut ledger = FifoLedger::new();
        let at = ts("2025-01-10 12:00:00");
        ledger.record_buy(buy(dec!(0.01), dec!(50000), dec!(0.50), at));

        assert_eq!(ledger.lots().len(), 1);
        let lot = &ledger.lots()[0];
        assert_eq!(lot.status, LotStatus::Open);
        assert_eq!(lot.purchase_total_usd, dec!(500.50));
        assert_eq!(lot.purchase_total_eur, dec!(500.50) / dec!(1.10));
        assert_eq!(ledger.total_btc(at).inner(), dec!(0.01));
        assert_eq!(ledger.tax_free_btc(at).inner(), dec!(0));
    }

    #[test]
    fn test_profitable_round_trip() {
        // Scenario: buy 0.01 @ 50,000 fee 0.50, sell 0.01 @ 50,500
        // fee 0.505, EUR/USD 1.10 both legs, held 0 days.
        let mut ledger = FifoLedger::new();
        let at = ts("2025-01-10 12:00:00");
        ledger.record_buy(buy(dec!(0.01), dec!(50000), dec!(0.50), at));

        let disposals = ledger
            .record_sell(sell(dec!(0.01), dec!(50500), dec!(0.505), at))
            .unwrap();
        assert_eq!(disposals.len(), 1);
        let d = &disposals[0];

        let expected_basis = dec!(500.50) / dec!(1.10);
        let expected_proceeds = (dec!(505.00) - dec!(0.505)) / dec!(1.10);
        assert_eq!(d.cost_basis_eur, expected_basis);
        assert_eq!(d.proceeds_eur, expected_proceeds);
        assert_eq!(d.gain_loss_eur, expected_proceeds - expected_basis);
        assert!(d.gain_loss_eur > dec!(3.6) && d.gain_loss_eur < dec!(3.7));
        assert!(d.is_taxable);
        assert_eq!(ledger.total_btc(at).inner(), dec!(0));
        assert_eq!(ledger.lots()[0].status, LotStatus::Closed);
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let mut ledger = FifoLedger::new();
        ledger.record_buy(buy(dec!(0.01), dec!(40000), dec!(0), ts("2025-01-01 00:00:00")));
        ledger.record_buy(buy(dec!(0.01), dec!(50000), dec!(0), ts("2025-02-01 00:00:00")));
        ledger.record_buy(buy(dec!(0.01), dec!(60000), dec!(0), ts("2025-03-01 00:00:00")));

        let disposals = ledger
            .record_sell(sell(dec!(0.015), dec!(55000), dec!(0), ts("2025-04-01 00:00:00")))
            .unwrap();

        assert_eq!(disposals.len(), 2);
        // Ascending purchase time across disposals of a single sell.
        let lot0 = ledger.lot(disposals[0].lot_id).unwrap();
        let lot1 = ledger.lot(disposals[1].lot_id).unwrap();
        assert!(lot0.purchased_at < lot1.purchased_at);
        assert_eq!(disposals[0].qty_btc.inner(), dec!(0.01));
        assert_eq!(disposals[1].qty_btc.inner(), dec!(0.005));
        assert_eq!(lot0.status, LotStatus::Closed);
        assert_eq!(lot1.status, LotStatus::Partial);
        assert_eq!(lot1.remaining_qty_btc.inner(), dec!(0.005));
    }

    #[test]
    fn test_quantity_conservation() {
        let mut ledger = FifoLedger::new();
        let t0 = ts("2025-01-01 00:00:00");
        ledger.record_buy(buy(dec!(0.03), dec!(40000), dec!(1), t0));
        ledger.record_buy(buy(dec!(0.02), dec!(45000), dec!(1), t0));
        ledger
            .record_sell(sell(dec!(0.012), dec!(50000), dec!(0.5), t0))
            .unwrap();
        ledger
            .record_sell(sell(dec!(0.02), dec!(51000), dec!(0.5), t0))
            .unwrap();

        let open_sum: Decimal = ledger.open_lots().map(|l| l.remaining_qty_btc.inner()).sum();
        assert_eq!(open_sum, dec!(0.05) - dec!(0.012) - dec!(0.02));
        assert_eq!(ledger.total_btc(t0).inner(), open_sum);
    }

    #[test]
    fn test_cost_basis_proportionality() {
        let mut ledger = FifoLedger::new();
        let t0 = ts("2025-01-01 00:00:00");
        ledger.record_buy(buy(dec!(0.04), dec!(50000), dec!(2), t0));
        let disposals = ledger
            .record_sell(sell(dec!(0.01), dec!(52000), dec!(0.5), t0))
            .unwrap();
        let d = &disposals[0];
        let lot = ledger.lot(d.lot_id).unwrap();

        let ratio = d.cost_basis_eur / lot.purchase_total_eur;
        let expected = d.qty_btc.inner() / lot.original_qty_btc.inner();
        assert!((ratio - expected).abs() < dec!(0.00000001));
    }

    #[test]
    fn test_holding_period_inclusive_boundary() {
        let mut ledger = FifoLedger::new();
        let bought = ts("2024-01-01 12:00:00");
        ledger.record_buy(buy(dec!(0.02), dec!(40000), dec!(0), bought));

        let just_before = bought + Duration::days(365) - Duration::seconds(1);
        let exactly = bought + Duration::days(365);
        assert_eq!(ledger.tax_free_btc(just_before).inner(), dec!(0));
        assert_eq!(ledger.tax_free_btc(exactly).inner(), dec!(0.02));

        let disposals = ledger
            .record_sell(sell(dec!(0.02), dec!(60000), dec!(1), exactly))
            .unwrap();
        assert!(!disposals[0].is_taxable);
        // Tax-free disposals never touch the YTD figure.
        assert_eq!(ledger.ytd_realized_gain_eur(2025), dec!(0));
    }

    #[test]
    fn test_insufficient_lots_rejected_and_ledger_untouched() {
        let mut ledger = FifoLedger::new();
        let t0 = ts("2025-01-01 00:00:00");
        ledger.record_buy(buy(dec!(0.01), dec!(50000), dec!(0), t0));

        let err = ledger
            .record_sell(sell(dec!(0.02), dec!(50000), dec!(0), t0))
            .unwrap_err();
        assert!(matches!(err, TaxError::InsufficientLots { .. }));
        assert_eq!(ledger.total_btc(t0).inner(), dec!(0.01));
        assert!(ledger.disposals().is_empty());
    }

    #[test]
    fn test_ytd_tracks_taxable_gains_by_year() {
        let mut ledger = FifoLedger::new();
        ledger.record_buy(buy(dec!(0.02), dec!(40000), dec!(0), ts("2025-01-01 00:00:00")));
        ledger
            .record_sell(sell(dec!(0.01), dec!(50000), dec!(0), ts("2025-06-01 00:00:00")))
            .unwrap();

        let expected = (dec!(0.01) * dec!(50000)) / dec!(1.10)
            - (dec!(0.01) / dec!(0.02)) * (dec!(800) / dec!(1.10));
        assert_eq!(ledger.ytd_realized_gain_eur(2025), expected);
        assert_eq!(ledger.ytd_realized_gain_eur(2024), dec!(0));
    }

    #[test]
    fn test_underwater_lots_sorted_and_filtered() {
        let mut ledger = FifoLedger::new();
        let now = ts("2025-06-01 00:00:00");
        // Deep loss, young lot.
        ledger.record_buy(buy(dec!(0.01), dec!(60000), dec!(0), ts("2025-05-01 00:00:00")));
        // Small loss, young lot.
        ledger.record_buy(buy(dec!(0.01), dec!(51000), dec!(0), ts("2025-05-02 00:00:00")));
        // Near-threshold lot: excluded even if underwater.
        ledger.record_buy(buy(dec!(0.01), dec!(60000), dec!(0), ts("2024-07-01 00:00:00")));
        // Tax-free lot: excluded.
        ledger.record_buy(buy(dec!(0.01), dec!(60000), dec!(0), ts("2023-01-01 00:00:00")));

        let under = ledger.underwater_lots(Price::new(dec!(50000)), dec!(1.10), 330, now);
        assert_eq!(under.len(), 2);
        // Largest loss first.
        assert!(under[0].1 < under[1].1);
        assert_eq!(under[0].0.purchase_price_usd.inner(), dec!(60000));
    }

    #[test]
    fn test_days_until_next_free() {
        let mut ledger = FifoLedger::new();
        let now = ts("2025-06-01 00:00:00");
        ledger.record_buy(buy(dec!(0.01), dec!(50000), dec!(0), ts("2024-07-01 00:00:00")));
        let days = ledger.days_until_next_free(now).unwrap();
        assert_eq!(days, (ts("2024-07-01 00:00:00") + Duration::days(365) - now).num_days());
        assert!(ledger.days_until_next_free(now + Duration::days(400)).is_none());
    }

    #[test]
    fn test_tax_free_cache_expires_on_unlock() {
        let mut ledger = FifoLedger::new();
        let bought = ts("2024-06-01 00:00:00");
        ledger.record_buy(buy(dec!(0.01), dec!(50000), dec!(0), bought));

        let before = bought + Duration::days(364);
        assert_eq!(ledger.tax_free_btc(before).inner(), dec!(0));
        // No mutation in between; the unlock alone must refresh the cache.
        let after = bought + Duration::days(366);
        assert_eq!(ledger.tax_free_btc(after).inner(), dec!(0.01));
    }
}
