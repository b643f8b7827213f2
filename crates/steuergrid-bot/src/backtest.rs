//! CSV tick replay.
//!
//! Replays a `ts,price,volume` file through the strategy loop against
//! the paper session: resting orders fill when the replayed price
//! crosses them, fills flow into the FIFO ledger, and the run ends
//! with a summary. This is a sanity harness, not a performance
//! backtester — slippage and queue position are not modelled.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use steuergrid_core::{Price, Qty};
use steuergrid_exec::ExchangeSession;
use steuergrid_tax::{FifoLedger, FixedRate};
use steuergrid_telemetry::EngineCounters;

use crate::app::paper::PaperSession;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::strategy::{MarketEvent, StrategyLoop};

/// Replay summary.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub rows: u64,
    pub fills: u64,
    pub commands: u64,
    pub open_lots: usize,
    pub disposals: usize,
    pub final_equity_usd: Decimal,
    pub realized_gain_eur: Decimal,
}

impl std::fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Backtest replay")?;
        writeln!(f, "{}", "=".repeat(40))?;
        writeln!(f, "Rows replayed:     {}", self.rows)?;
        writeln!(f, "Commands issued:   {}", self.commands)?;
        writeln!(f, "Fills:             {}", self.fills)?;
        writeln!(f, "Open lots:         {}", self.open_lots)?;
        writeln!(f, "Disposals:         {}", self.disposals)?;
        writeln!(f, "Final equity USD:  {:.2}", self.final_equity_usd)?;
        writeln!(f, "Realized gain EUR: {:.2}", self.realized_gain_eur)
    }
}

#[derive(Debug, serde::Deserialize)]
struct TickRow {
    ts: String,
    price: Decimal,
    #[serde(default)]
    volume: Option<Decimal>,
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|n| n.and_utc())
        .map_err(|e| AppError::Config(format!("unparseable timestamp {raw:?}: {e}")))
}

/// Replay the file through a fresh engine. The ledger starts empty and
/// is not persisted.
pub async fn run(config: &AppConfig, data: &Path) -> Result<BacktestReport> {
    let mut reader = csv::Reader::from_path(data)
        .map_err(|e| AppError::Config(format!("cannot open {}: {e}", data.display())))?;

    let counters = Arc::new(EngineCounters::new());
    let mut strategy = StrategyLoop::new(
        config,
        FifoLedger::new(),
        Arc::new(FixedRate(config.eur_usd_rate_fallback)),
        counters.clone(),
    );
    let session = PaperSession::new(25.into());
    let (_, mut events) = session.subscribe_executions(true).await?;

    let mut rows = 0u64;
    let mut commands_total = 0u64;
    let mut first_ts: Option<DateTime<Utc>> = None;
    let mut last_ts = Utc::now();

    for record in reader.deserialize() {
        let row: TickRow =
            record.map_err(|e| AppError::Config(format!("bad row in {}: {e}", data.display())))?;
        let ts = parse_ts(&row.ts)?;
        let t0 = *first_ts.get_or_insert(ts);
        let now_ms = (ts - t0).num_milliseconds().max(0) as u64;
        last_ts = ts;
        rows += 1;

        let mid = Price::new(row.price);
        session.on_mid(mid, ts);
        while let Ok(event) = events.try_recv() {
            strategy.on_exec_event(&event, now_ms);
        }

        strategy.on_market(MarketEvent::Mid(mid));
        if let Some(volume) = row.volume.filter(|v| *v > Decimal::ZERO) {
            strategy.on_market(MarketEvent::Trade {
                price: mid,
                qty: Qty::new(volume),
            });
        }

        let commands = strategy.tick(now_ms, ts);
        commands_total += commands.len() as u64;
        for cmd in &commands {
            match cmd {
                steuergrid_exec::OrderCommand::Add {
                    cl_ord_id,
                    side,
                    price,
                    qty,
                    ..
                } => {
                    session.add_order(cl_ord_id, *side, *price, *qty, true).await?;
                }
                steuergrid_exec::OrderCommand::Amend {
                    order_id,
                    new_price,
                    new_qty,
                    ..
                } => {
                    session.amend_order(order_id, *new_price, *new_qty).await?;
                }
                steuergrid_exec::OrderCommand::Cancel { order_id, .. } => {
                    session.cancel_order(order_id).await?;
                }
            }
        }
        while let Ok(event) = events.try_recv() {
            strategy.on_exec_event(&event, now_ms);
        }
        strategy.take_ledger_dirty();
    }

    let ledger = strategy.ledger();
    use chrono::Datelike;
    let report = BacktestReport {
        rows,
        fills: EngineCounters::get(&counters.fills),
        commands: commands_total,
        open_lots: ledger.open_lots().count(),
        disposals: ledger.disposals().len(),
        final_equity_usd: strategy.portfolio(last_ts).equity_usd(),
        realized_gain_eur: ledger.ytd_realized_gain_eur(last_ts.year()),
    };
    info!(rows = report.rows, fills = report.fills, "Replay complete");
    Ok(report)
}
