//! Tick orchestrator.
//!
//! One `tick` call runs the whole pipeline exactly once: market data
//! feeds the regime router and circuit breaker, risk and tax gates
//! decide whether and what to quote, the grid emits desired levels,
//! and the order manager diffs them against the live slots. Execution
//! events are applied between ticks through `on_exec_event`; all
//! component mutation happens on the caller's (single) strategy task,
//! so a sell decision can never change under the dispatch it gates.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use steuergrid_core::{
    ExecEvent, LotSource, PauseState, PortfolioSnapshot, Price, Qty, TaxDecision,
};
use steuergrid_exec::{DesiredOrder, OrderCommand, OrderManager, RateLimiter};
use steuergrid_mm::{
    BollingerSpacing, DeltaSkew, FeeModel, GridCenter, GridEngine, InventoryArbiter, RegimeRouter,
};
use steuergrid_risk::{CircuitBreaker, RiskManager};
use steuergrid_tax::{EurUsdRates, FifoLedger, TaxAgent, TaxError};
use steuergrid_telemetry::EngineCounters;

use crate::config::AppConfig;

/// Market data events from the public feed collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketEvent {
    Mid(Price),
    Trade { price: Price, qty: Qty },
}

/// The per-tick strategy orchestrator. Owns every mutable component;
/// the engine drives it from a single task.
pub struct StrategyLoop {
    fees: FeeModel,
    router: RegimeRouter,
    spacing: BollingerSpacing,
    skew: DeltaSkew,
    grid: GridEngine,
    arbiter: InventoryArbiter,
    risk: RiskManager,
    breaker: CircuitBreaker,
    tax: TaxAgent,
    ledger: FifoLedger,
    om: OrderManager,
    limiter: RateLimiter,
    rates: Arc<dyn EurUsdRates>,
    counters: Arc<EngineCounters>,

    usd_balance: Decimal,
    last_mid: Option<Price>,
    book_synced: bool,
    ledger_dirty: bool,
    edge_warned: bool,

    max_levels_per_side: u32,
    grid_center: GridCenter,
    min_order_btc: Decimal,
    rate_fallback: Decimal,
}

impl StrategyLoop {
    #[must_use]
    pub fn new(
        config: &AppConfig,
        ledger: FifoLedger,
        rates: Arc<dyn EurUsdRates>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        let fees = FeeModel::new(config.volume_30d_usd);
        let fee_floor = fees.min_profitable_spacing_bps();
        let slots = (config.max_levels_per_side * 2) as usize;
        Self {
            spacing: BollingerSpacing::new(config.spacing.clone(), fee_floor),
            router: RegimeRouter::new(config.regime.clone()),
            skew: DeltaSkew::new(config.skew.clone()),
            grid: GridEngine::new(config.grid.clone()),
            arbiter: InventoryArbiter::new(&config.grid),
            risk: RiskManager::new(config.risk.clone(), config.initial_usd),
            breaker: CircuitBreaker::new(&config.risk),
            tax: TaxAgent::new(config.tax.clone()),
            om: OrderManager::new(slots),
            limiter: RateLimiter::new(
                config.rate_limit.max_counter,
                config.rate_limit.decay_per_sec,
                config.rate_limit.headroom_pct,
            ),
            fees,
            ledger,
            rates,
            counters,
            usd_balance: config.initial_usd,
            last_mid: None,
            book_synced: true,
            ledger_dirty: false,
            edge_warned: false,
            max_levels_per_side: config.max_levels_per_side,
            grid_center: config.grid_center,
            min_order_btc: config.grid.min_order_btc,
            rate_fallback: config.eur_usd_rate_fallback,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &FifoLedger {
        &self.ledger
    }

    #[must_use]
    pub fn order_manager(&mut self) -> &mut OrderManager {
        &mut self.om
    }

    #[must_use]
    pub fn pause(&self) -> PauseState {
        self.risk.pause()
    }

    /// Portfolio valuation at the last seen mid.
    #[must_use]
    pub fn portfolio(&self, now: DateTime<Utc>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            btc_qty: self.ledger.total_btc(now),
            usd_qty: self.usd_balance,
            mid_price: self.last_mid.unwrap_or(Price::ZERO),
        }
    }

    /// Consume the dirty flag; true means the ledger changed since the
    /// last save was scheduled.
    pub fn take_ledger_dirty(&mut self) -> bool {
        std::mem::take(&mut self.ledger_dirty)
    }

    /// External deposit/withdrawal notification.
    pub fn adjust_hwm(&mut self, delta_usd: Decimal) {
        self.risk.adjust_hwm(delta_usd);
        self.usd_balance += delta_usd;
    }

    /// Operator acknowledgement after a ledger mismatch.
    pub fn acknowledge_ledger_mismatch(&mut self) {
        self.om.acknowledge_ledger_mismatch();
        self.risk.operator_resume();
    }

    /// Feed a market data event.
    pub fn on_market(&mut self, event: MarketEvent) {
        match event {
            MarketEvent::Mid(mid) => self.last_mid = Some(mid),
            MarketEvent::Trade { price, qty } => self.router.update_trade(price, qty),
        }
    }

    /// Apply one execution event. Fills are routed into the FIFO
    /// ledger; a sell the ledger cannot cover flags the mismatch latch
    /// and pauses trading.
    pub fn on_exec_event(&mut self, event: &ExecEvent, now_ms: u64) {
        match event {
            ExecEvent::RateCount { count } => self.limiter.reconcile_server(*count, now_ms),
            ExecEvent::BookChecksumMismatch => {
                warn!("Book checksum mismatch, trading paused until re-sync");
                self.book_synced = false;
            }
            ExecEvent::BookSynced => {
                info!("Book re-synced, trading resumes");
                self.book_synced = true;
            }
            ExecEvent::Reject { .. } | ExecEvent::AmendReject { .. } => {
                EngineCounters::inc(&self.counters.rejects);
                let _ = self.om.on_event(event);
            }
            other => {
                let Some(fill) = self.om.on_event(other) else {
                    return;
                };
                EngineCounters::inc(&self.counters.fills);
                let rate = self.rate_for(fill.ts);
                let notional = fill.qty.notional(fill.price);
                match fill.side {
                    steuergrid_core::Side::Buy => {
                        self.usd_balance -= notional + fill.fee_usd;
                    }
                    steuergrid_core::Side::Sell => {
                        self.usd_balance += notional - fill.fee_usd;
                    }
                }
                let side = fill.side;
                match self.ledger.record_fill(side, fill, rate, LotSource::Grid) {
                    Ok(_) => self.ledger_dirty = true,
                    Err(TaxError::InsufficientLots { requested, available }) => {
                        error!(
                            %requested,
                            %available,
                            "Sell fill exceeds ledger holdings, entering ledger mismatch"
                        );
                        self.om.flag_ledger_mismatch();
                        self.risk.force_pause();
                    }
                    Err(e) => error!(error = %e, "Ledger update failed"),
                }
            }
        }
    }

    /// Run one pipeline pass. Returns the admitted commands to
    /// dispatch, already rate-limited and priority-ordered.
    pub fn tick(&mut self, now_ms: u64, now: DateTime<Utc>) -> Vec<OrderCommand> {
        let Some(mid) = self.last_mid else {
            return Vec::new();
        };
        EngineCounters::inc(&self.counters.ticks);

        // Estimators always run, even on gated ticks, so hysteresis
        // and volatility windows track the market while paused.
        self.router.update_price(mid);
        self.spacing.update(mid, None, None);
        let frozen = self.breaker.observe(now_ms, mid);
        let decision = self.router.classify(frozen);

        let snapshot = PortfolioSnapshot {
            btc_qty: self.ledger.total_btc(now),
            usd_qty: self.usd_balance,
            mid_price: mid,
        };
        let tax_locked = self.tax.is_tax_locked(&self.ledger, now);
        self.risk.set_tax_locked(tax_locked);
        let (risk_snap, _) = self.risk.update_equity(snapshot.equity_usd());

        if self.om.ledger_mismatch() {
            self.risk.force_pause();
            return self.om.cancel_all_commands(now_ms);
        }
        if frozen {
            EngineCounters::inc(&self.counters.ticks_skipped_frozen);
            return Vec::new();
        }
        if !self.book_synced {
            return Vec::new();
        }

        let pause = risk_snap.pause;
        if !pause.trading_allowed() {
            EngineCounters::inc(&self.counters.ticks_skipped_pause);
            return self.om.cancel_all_commands(now_ms);
        }

        let base_spacing = self.spacing.spacing_bps();
        if self.fees.expected_net_edge_bps(base_spacing) <= Decimal::ZERO {
            if !self.edge_warned {
                warn!(spacing = %base_spacing, "No positive edge at current spacing, not quoting");
                self.edge_warned = true;
            }
            return Vec::new();
        }
        self.edge_warned = false;

        let limits = decision.limits;
        let skew_result = self
            .skew
            .compute(snapshot.btc_alloc_pct(), limits.btc_target_pct);
        let (buy_spacing, sell_spacing) =
            self.skew
                .apply(base_spacing, skew_result, self.spacing.min_spacing_bps());

        // Level counts: regime shape, clamped to the slot table, then
        // tax-gated on the sell side.
        let levels = limits.grid_levels.min(self.max_levels_per_side);
        let num_buy = if pause.buy_allowed() { levels } else { 0 };
        let num_sell = if !pause.sell_allowed() {
            0
        } else if pause == PauseState::EmergencySell {
            // Emergency: the tax gate is overridden, sell the full side.
            levels
        } else {
            let fraction = self.tax.sell_level_fraction(&self.ledger, now);
            (Decimal::from(levels) * fraction)
                .floor()
                .to_u32()
                .unwrap_or(0)
        };

        let center = match self.grid_center {
            GridCenter::Vwap => self.router.vwap().unwrap_or(mid),
            GridCenter::Mid => mid,
        };
        let grid = self.grid.compute(
            center,
            buy_spacing,
            sell_spacing,
            num_buy,
            num_sell,
            limits.order_size_scale,
        );

        // Sell side passes the tax agent as one aggregate quantity; the
        // decision cannot change under us before dispatch because the
        // ledger only mutates on this task.
        let mut sells = grid.sell_levels;
        let total_sell: Decimal = sells.iter().map(|l| l.qty.inner()).sum();
        if total_sell > Decimal::ZERO {
            let rate = self.rate_for(now);
            let eval = self.tax.evaluate_sell(
                &self.ledger,
                Qty::new(total_sell),
                mid,
                rate,
                risk_snap.drawdown_pct,
                now,
            );
            match eval.decision {
                TaxDecision::Allow | TaxDecision::AllowAll => {}
                TaxDecision::AllowPartial => {
                    sells =
                        InventoryArbiter::trim_levels(&sells, eval.allowed_qty, self.min_order_btc);
                }
                TaxDecision::Veto => {
                    EngineCounters::inc(&self.counters.tax_vetoes);
                    debug!(reason = %eval.reason, "Sell side vetoed");
                    sells.clear();
                }
            }
        }

        // Allocation bands cap both sides, outermost levels first.
        let caps = self.arbiter.caps(&snapshot, &limits);
        let buys =
            InventoryArbiter::trim_levels(&grid.buy_levels, caps.max_buy_btc, self.min_order_btc);
        let sells = InventoryArbiter::trim_levels(&sells, caps.max_sell_btc, self.min_order_btc);

        // Slot layout: buys in the lower half, sells in the upper half.
        let slots = (self.max_levels_per_side * 2) as usize;
        let mut desired: Vec<Option<DesiredOrder>> = vec![None; slots];
        for (i, level) in buys.iter().take(self.max_levels_per_side as usize).enumerate() {
            desired[i] = Some(DesiredOrder {
                side: level.side,
                price: level.price,
                qty: level.qty,
            });
        }
        for (i, level) in sells.iter().take(self.max_levels_per_side as usize).enumerate() {
            desired[self.max_levels_per_side as usize + i] = Some(DesiredOrder {
                side: level.side,
                price: level.price,
                qty: level.qty,
            });
        }

        let mut commands = self.om.reconcile_desired(&desired, now_ms);

        // Cancels before risk amends before amends before news; the
        // limiter defers whatever the headroom cannot carry and the
        // slot recomputes next tick.
        commands.sort_by_key(OrderCommand::class);
        let mut admitted = Vec::with_capacity(commands.len());
        for cmd in commands {
            if self.limiter.admit(cmd.class(), now_ms) {
                admitted.push(cmd);
            } else {
                self.om.defer(&cmd);
            }
        }

        for _ in &admitted {
            EngineCounters::inc(&self.counters.commands_issued);
        }
        admitted
    }

    /// Commands to flatten the book (shutdown or pause path).
    pub fn cancel_all(&mut self, now_ms: u64) -> Vec<OrderCommand> {
        self.om.cancel_all_commands(now_ms)
    }

    fn rate_for(&self, at: DateTime<Utc>) -> Decimal {
        match self.rates.rate_for(at.date_naive()) {
            Ok(rate) => rate,
            Err(e) => {
                warn!(error = %e, fallback = %self.rate_fallback, "EUR/USD rate lookup failed");
                self.rate_fallback
            }
        }
    }
}

impl StrategyLoop {
    /// Reconcile the slot table against the venue snapshot; returns
    /// orphan order ids the engine must cancel.
    pub fn reconcile_snapshot(
        &mut self,
        open_orders: &[steuergrid_exec::OpenOrder],
    ) -> Vec<String> {
        self.om.reconcile_snapshot(open_orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use steuergrid_core::Side;
    use steuergrid_tax::FixedRate;

    fn ts(s: &str) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn strategy() -> StrategyLoop {
        let config = AppConfig::default();
        StrategyLoop::new(
            &config,
            FifoLedger::new(),
            Arc::new(FixedRate(dec!(1.10))),
            Arc::new(EngineCounters::new()),
        )
    }

    /// Ack then fully fill the first Add in `commands`, simulating the
    /// venue. Returns (price, qty) of the fill.
    fn fill_first_add(
        s: &mut StrategyLoop,
        commands: &[OrderCommand],
        oid: &str,
        now_ms: u64,
        now: DateTime<Utc>,
    ) -> (Price, Qty) {
        let OrderCommand::Add { cl_ord_id, price, qty, .. } = commands[0].clone() else {
            panic!("expected add, got {:?}", commands[0]);
        };
        s.on_exec_event(
            &ExecEvent::NewAck {
                cl_ord_id,
                order_id: oid.to_string(),
            },
            now_ms,
        );
        s.on_exec_event(
            &ExecEvent::Trade {
                order_id: oid.to_string(),
                trade_id: format!("T-{oid}"),
                price,
                qty,
                fee_usd: dec!(0.25),
                ts: now,
            },
            now_ms,
        );
        (price, qty)
    }

    #[test]
    fn test_no_tick_without_market_data() {
        let mut s = strategy();
        assert!(s.tick(0, ts("2025-06-02 12:00:00")).is_empty());
    }

    #[test]
    fn test_fresh_portfolio_quotes_buy_side_only() {
        let mut s = strategy();
        let now = ts("2025-06-02 12:00:00");
        s.on_market(MarketEvent::Mid(Price::new(dec!(50000))));
        let commands = s.tick(0, now);

        // No BTC: sellable ratio 0, buy-only grid.
        assert!(!commands.is_empty());
        for cmd in &commands {
            match cmd {
                OrderCommand::Add { side, price, .. } => {
                    assert_eq!(*side, Side::Buy);
                    assert!(price.inner() < dec!(50000));
                }
                other => panic!("expected adds, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_buy_fill_flows_into_ledger_and_balance() {
        let mut s = strategy();
        let now = ts("2025-06-02 12:00:00");
        s.on_market(MarketEvent::Mid(Price::new(dec!(50000))));
        let commands = s.tick(0, now);
        let (price, qty) = fill_first_add(&mut s, &commands, "OID-1", 1000, now);

        assert_eq!(s.ledger().lots().len(), 1);
        assert_eq!(s.ledger().total_btc(now), qty);
        assert!(s.take_ledger_dirty());
        let expected_usd = dec!(5000) - qty.notional(price) - dec!(0.25);
        assert_eq!(s.portfolio(now).usd_qty, expected_usd);
    }

    #[test]
    fn test_book_checksum_pauses_and_resumes() {
        let mut s = strategy();
        let now = ts("2025-06-02 12:00:00");
        s.on_market(MarketEvent::Mid(Price::new(dec!(50000))));

        s.on_exec_event(&ExecEvent::BookChecksumMismatch, 0);
        assert!(s.tick(100, now).is_empty());

        s.on_exec_event(&ExecEvent::BookSynced, 200);
        assert!(!s.tick(1000, now).is_empty());
    }

    #[test]
    fn test_circuit_freeze_blocks_dispatch() {
        let mut s = strategy();
        let now = ts("2025-06-02 12:00:00");
        s.on_market(MarketEvent::Mid(Price::new(dec!(50000))));
        s.tick(0, now);

        // +3.2% jump inside the window freezes the breaker.
        s.on_market(MarketEvent::Mid(Price::new(dec!(51600))));
        let commands = s.tick(1000, now);
        assert!(commands.is_empty());
        assert_eq!(EngineCounters::get(&s.counters.ticks_skipped_frozen), 1);
    }

    #[test]
    fn test_order_reject_bumps_counter_and_frees_slot() {
        let mut s = strategy();
        let now = ts("2025-06-02 12:00:00");
        s.on_market(MarketEvent::Mid(Price::new(dec!(50000))));
        let commands = s.tick(0, now);
        let OrderCommand::Add { cl_ord_id, .. } = commands[0].clone() else {
            panic!("expected add");
        };

        s.on_exec_event(
            &ExecEvent::Reject {
                cl_ord_id,
                reason: "post only would cross".into(),
            },
            1000,
        );
        assert_eq!(EngineCounters::get(&s.counters.rejects), 1);
        assert!(s.ledger().lots().is_empty());

        // Amend rejects count too: place, ack, amend, reject the amend.
        let commands = s.tick(2000, now);
        let OrderCommand::Add { cl_ord_id, .. } = commands[0].clone() else {
            panic!("expected add");
        };
        s.on_exec_event(
            &ExecEvent::NewAck {
                cl_ord_id,
                order_id: "OID-1".into(),
            },
            2500,
        );
        s.on_market(MarketEvent::Mid(Price::new(dec!(50050))));
        let commands = s.tick(3000, now);
        assert!(matches!(commands[0], OrderCommand::Amend { .. }));
        s.on_exec_event(
            &ExecEvent::AmendReject {
                order_id: "OID-1".into(),
                reason: "post only".into(),
            },
            3500,
        );
        assert_eq!(EngineCounters::get(&s.counters.rejects), 2);
    }

    #[test]
    fn test_tax_lock_goes_buy_only_after_fills() {
        let mut s = strategy();
        let now = ts("2025-06-02 12:00:00");
        s.on_market(MarketEvent::Mid(Price::new(dec!(50000))));

        // Accumulate young (tax-locked) BTC through a few fills.
        let mut clock = 0;
        for round in 0..3 {
            clock += 1000;
            let commands = s.tick(clock, now);
            if commands.is_empty() {
                continue;
            }
            fill_first_add(&mut s, &commands, &format!("OID-{round}"), clock, now);
        }
        assert!(s.ledger().total_btc(now).is_positive());

        // Every subsequent command is buy-side: sellable ratio is zero.
        clock += 1000;
        let commands = s.tick(clock, now);
        for cmd in &commands {
            if let OrderCommand::Add { side, .. } = cmd {
                assert_eq!(*side, Side::Buy);
            }
        }
    }

    #[test]
    fn test_emergency_drawdown_sells_despite_tax() {
        let mut s = strategy();
        let now = ts("2025-06-02 12:00:00");
        s.on_market(MarketEvent::Mid(Price::new(dec!(50000))));

        // Accumulate ~0.05 young BTC (five capped fills).
        let mut clock = 0u64;
        let mut rounds = 0;
        while rounds < 5 {
            clock += 1000;
            let commands = s.tick(clock, now);
            if commands.is_empty() {
                continue;
            }
            fill_first_add(&mut s, &commands, &format!("OID-{rounds}"), clock, now);
            rounds += 1;
        }
        let btc = s.ledger().total_btc(now);
        assert!(btc.inner() >= dec!(0.04), "accumulated {btc}");

        // Crash: walk the price down slowly enough to dodge the
        // breaker, far enough for an emergency drawdown.
        let mut mid = dec!(50000);
        while mid > dec!(29000) {
            mid -= dec!(90);
            clock += 10_000;
            s.on_market(MarketEvent::Mid(Price::new(mid)));
            s.tick(clock, now);
        }

        assert_eq!(s.pause(), PauseState::EmergencySell);
        clock += 10_000;
        let commands = s.tick(clock, now);
        let has_sell = commands
            .iter()
            .any(|c| matches!(c, OrderCommand::Add { side: Side::Sell, .. }));
        assert!(
            has_sell,
            "expected sell-side orders in EMERGENCY_SELL, got {commands:?}"
        );
    }
}
