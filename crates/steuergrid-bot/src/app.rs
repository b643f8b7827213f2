//! Engine wiring and lifecycle coordination.
//!
//! Startup: load the ledger (refuse to start on corruption), subscribe
//! to executions with a snapshot, reconcile slots against the venue
//! (cancelling orphans), arm the dead-man's switch, then tick.
//!
//! Runtime: a single strategy task selects over market data, execution
//! events and an idle timer; ledger saves run on a persistence task
//! fed through a single-slot mailbox that coalesces bursts.
//!
//! Shutdown (SIGINT/SIGTERM): stop ticking, cancel all orders, disarm
//! the DMS with `cancel_after(0)`, persist the ledger synchronously and
//! close. The exchange-facing part runs under a five-second deadline;
//! the final ledger save happens regardless.

pub mod paper;

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use steuergrid_exec::{ExchangeSession, Heartbeat, OrderCommand};
use steuergrid_tax::{EurUsdRates, LedgerDocument, LedgerStore};
use steuergrid_telemetry::EngineCounters;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::strategy::{MarketEvent, StrategyLoop};

/// The assembled engine. Owns the strategy loop; everything else is
/// reached through trait handles wired at construction.
pub struct Engine {
    config: AppConfig,
    session: Arc<dyn ExchangeSession>,
    store: Arc<dyn LedgerStore>,
    strategy: StrategyLoop,
    counters: Arc<EngineCounters>,
    started: Instant,
}

impl Engine {
    /// Load the ledger and assemble the engine. A corrupt ledger file
    /// refuses to start; an absent one starts fresh.
    pub fn bootstrap(
        config: AppConfig,
        session: Arc<dyn ExchangeSession>,
        store: Arc<dyn LedgerStore>,
        rates: Arc<dyn EurUsdRates>,
    ) -> Result<Self> {
        let ledger = match store.load()? {
            Some(doc) => doc.into_ledger(),
            None => steuergrid_tax::FifoLedger::new(),
        };
        let counters = Arc::new(EngineCounters::new());
        let strategy = StrategyLoop::new(&config, ledger, rates, counters.clone());
        Ok(Self {
            config,
            session,
            store,
            strategy,
            counters,
            started: Instant::now(),
        })
    }

    #[must_use]
    pub fn counters(&self) -> Arc<EngineCounters> {
        self.counters.clone()
    }

    #[must_use]
    pub fn strategy(&self) -> &StrategyLoop {
        &self.strategy
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Run until `shutdown` flips true or the market feed closes.
    pub async fn run(
        mut self,
        mut market_rx: mpsc::Receiver<MarketEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        // Startup reconciliation against the venue snapshot.
        let (snapshot, mut events) = self.session.subscribe_executions(true).await?;
        let orphans = self.strategy.reconcile_snapshot(&snapshot);
        for order_id in orphans {
            if let Err(e) = self.session.cancel_order(&order_id).await {
                warn!(order_id, error = %e, "Orphan cancel failed");
            }
        }

        // Dead-man's switch.
        let heartbeat = Heartbeat {
            interval_sec: self.config.heartbeat.interval_sec,
            cancel_after_timeout_sec: self.config.heartbeat.cancel_after_timeout_sec,
        };
        let hb_task = tokio::spawn({
            let session = self.session.clone();
            let shutdown = shutdown.clone();
            async move { heartbeat.run(session, shutdown).await }
        });

        // Persistence task with a coalescing single-slot mailbox: the
        // latest document wins, a save in flight picks up at most one
        // redo.
        let (save_tx, save_rx) = watch::channel::<Option<LedgerDocument>>(None);
        let persist_task = tokio::spawn(Self::persistence_task(
            self.store.clone(),
            save_rx,
            self.counters.clone(),
        ));

        info!("Engine running");
        let mut shutdown_rx = shutdown.clone();
        let mut idle = tokio::time::interval(Duration::from_millis(self.config.idle_tick_ms));
        idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let run_result = loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown requested, draining");
                        break Ok(());
                    }
                }
                maybe = market_rx.recv() => {
                    match maybe {
                        Some(event) => {
                            self.strategy.on_market(event);
                            if let Err(e) = self.run_tick(&mut events, &save_tx).await {
                                break Err(e);
                            }
                        }
                        None => {
                            info!("Market feed closed, draining");
                            break Ok(());
                        }
                    }
                }
                maybe = events.recv() => {
                    match maybe {
                        Some(event) => {
                            let now_ms = self.now_ms();
                            self.strategy.on_exec_event(&event, now_ms);
                        }
                        None => {
                            // Reconnect recovery: the session dropped the
                            // stream. Re-subscribe and reconcile again; if
                            // the outage outlived the DMS timeout the venue
                            // has already flattened the book for us.
                            warn!("Execution stream closed, resubscribing");
                            match self.session.subscribe_executions(true).await {
                                Ok((snapshot, rx)) => {
                                    events = rx;
                                    let orphans = self.strategy.reconcile_snapshot(&snapshot);
                                    for order_id in orphans {
                                        let _ = self.session.cancel_order(&order_id).await;
                                    }
                                }
                                Err(e) => break Err(e.into()),
                            }
                        }
                    }
                }
                _ = idle.tick() => {
                    if let Err(e) = self.run_tick(&mut events, &save_tx).await {
                        break Err(e);
                    }
                }
            }
        };

        // Graceful shutdown: flatten, disarm, persist.
        let deadline = Duration::from_secs(5);
        let shutdown_result = tokio::time::timeout(deadline, async {
            let now_ms = self.now_ms();
            for cmd in self.strategy.cancel_all(now_ms) {
                if let Err(e) = self.dispatch(&cmd).await {
                    warn!(error = %e, "Cancel during shutdown failed");
                }
            }
            if let Err(e) = self.session.cancel_after(0).await {
                warn!(error = %e, "DMS disarm failed");
            }
        })
        .await;
        if shutdown_result.is_err() {
            warn!("Shutdown deadline exceeded, venue DMS will flatten the book");
        }

        hb_task.abort();
        drop(save_tx);
        let _ = persist_task.await;

        // Final synchronous save, always.
        let doc = LedgerDocument::from_ledger(self.strategy.ledger());
        self.store.save(&doc)?;
        info!("Engine stopped");
        run_result
    }

    async fn persistence_task(
        store: Arc<dyn LedgerStore>,
        mut save_rx: watch::Receiver<Option<LedgerDocument>>,
        counters: Arc<EngineCounters>,
    ) {
        while save_rx.changed().await.is_ok() {
            let doc = save_rx.borrow_and_update().clone();
            let Some(doc) = doc else { continue };
            let store = store.clone();
            let result = tokio::task::spawn_blocking(move || store.save(&doc)).await;
            match result {
                Ok(Ok(())) => EngineCounters::inc(&counters.ledger_saves),
                Ok(Err(e)) => error!(error = %e, "Ledger save failed"),
                Err(e) => error!(error = %e, "Ledger save task panicked"),
            }
        }
    }

    /// One pipeline pass: drain pending execution events, tick, send
    /// the admitted commands, drain again, schedule a save if the
    /// ledger changed.
    async fn run_tick(
        &mut self,
        events: &mut mpsc::Receiver<steuergrid_core::ExecEvent>,
        save_tx: &watch::Sender<Option<LedgerDocument>>,
    ) -> Result<()> {
        let now_ms = self.now_ms();
        while let Ok(event) = events.try_recv() {
            self.strategy.on_exec_event(&event, now_ms);
        }

        let commands = self.strategy.tick(now_ms, Utc::now());
        for cmd in &commands {
            self.dispatch(cmd).await?;
        }

        let now_ms = self.now_ms();
        while let Ok(event) = events.try_recv() {
            self.strategy.on_exec_event(&event, now_ms);
        }

        if self.strategy.take_ledger_dirty() {
            let doc = LedgerDocument::from_ledger(self.strategy.ledger());
            save_tx.send_replace(Some(doc));
        }
        Ok(())
    }

    async fn dispatch(&self, cmd: &OrderCommand) -> Result<()> {
        let result = match cmd {
            OrderCommand::Add {
                cl_ord_id,
                side,
                price,
                qty,
                ..
            } => {
                self.session
                    .add_order(cl_ord_id, *side, *price, *qty, true)
                    .await
            }
            OrderCommand::Amend {
                order_id,
                new_price,
                new_qty,
                ..
            } => {
                self.session
                    .amend_order(order_id, *new_price, *new_qty)
                    .await
            }
            OrderCommand::Cancel { order_id, .. } => self.session.cancel_order(order_id).await,
        };

        match result {
            Ok(()) => Ok(()),
            // Auth failures are fatal; everything else is the session
            // implementation's retry problem and slot timeouts will
            // clean up after it.
            Err(steuergrid_exec::ExecError::Auth(msg)) => Err(AppError::ExchangeAuth(msg)),
            Err(e) => {
                warn!(error = %e, ?cmd, "Dispatch failed, slot will retry");
                Ok(())
            }
        }
    }
}
