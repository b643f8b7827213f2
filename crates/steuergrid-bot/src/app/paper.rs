//! Paper exchange session.
//!
//! A deterministic in-process venue used by paper-mode `run`, the
//! backtest replay and the integration tests: post-only adds are acked
//! (or rejected when they would cross), amends and cancels ack
//! immediately, and each mid update fills whatever the move crossed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use steuergrid_core::{ExecEvent, Price, Qty, Side};
use steuergrid_exec::{ExchangeSession, OpenOrder, Result};

#[derive(Debug, Clone)]
struct RestingOrder {
    order_id: String,
    cl_ord_id: String,
    side: Side,
    price: Price,
    qty: Qty,
    filled: Qty,
}

#[derive(Default)]
struct Inner {
    orders: HashMap<String, RestingOrder>,
    by_cl: HashMap<String, String>,
    last_mid: Option<Price>,
    cancel_after_sec: u32,
    events: Option<mpsc::Sender<ExecEvent>>,
}

/// In-process venue simulator implementing [`ExchangeSession`].
pub struct PaperSession {
    inner: Mutex<Inner>,
    maker_fee_bps: Decimal,
    next_id: AtomicU64,
}

impl Default for PaperSession {
    fn default() -> Self {
        Self::new(dec!(25))
    }
}

impl PaperSession {
    #[must_use]
    pub fn new(maker_fee_bps: Decimal) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            maker_fee_bps,
            next_id: AtomicU64::new(1),
        }
    }

    fn emit(inner: &Inner, event: ExecEvent) {
        if let Some(tx) = &inner.events {
            // Execution events are never dropped; the channel is sized
            // far beyond anything a single tick can produce.
            if let Err(e) = tx.try_send(event) {
                warn!(error = %e, "Paper session event queue full");
            }
        }
    }

    /// Currently armed `cancel_after` timeout (0 = disarmed).
    #[must_use]
    pub fn armed_cancel_after(&self) -> u32 {
        self.inner.lock().cancel_after_sec
    }

    #[must_use]
    pub fn resting_count(&self) -> usize {
        self.inner.lock().orders.len()
    }

    /// Snapshot of resting orders as (order_id, side, price, qty).
    #[must_use]
    pub fn resting_orders(&self) -> Vec<(String, Side, Price, Qty)> {
        self.inner
            .lock()
            .orders
            .values()
            .map(|o| (o.order_id.clone(), o.side, o.price, o.qty))
            .collect()
    }

    /// Advance the market: orders the new mid crossed fill completely
    /// at their limit price with the maker fee applied.
    pub fn on_mid(&self, mid: Price, ts: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.last_mid = Some(mid);

        let crossed: Vec<String> = inner
            .orders
            .values()
            .filter(|o| match o.side {
                Side::Buy => mid <= o.price,
                Side::Sell => mid >= o.price,
            })
            .map(|o| o.order_id.clone())
            .collect();

        for order_id in crossed {
            let Some(order) = inner.orders.remove(&order_id) else {
                continue;
            };
            inner.by_cl.remove(&order.cl_ord_id);
            let remaining = order.qty - order.filled;
            let notional = remaining.notional(order.price);
            let fee = notional * self.maker_fee_bps / dec!(10000);
            debug!(order_id = %order.order_id, side = %order.side, qty = %remaining, "Paper fill");
            Self::emit(
                &inner,
                ExecEvent::Trade {
                    order_id: order.order_id.clone(),
                    trade_id: format!("PT-{}", order.order_id),
                    price: order.price,
                    qty: remaining,
                    fee_usd: fee,
                    ts,
                },
            );
        }
    }
}

#[async_trait]
impl ExchangeSession for PaperSession {
    async fn add_order(
        &self,
        cl_ord_id: &str,
        side: Side,
        price: Price,
        qty: Qty,
        post_only: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        // Post-only: reject anything that would cross the mid.
        let crosses = inner.last_mid.is_some_and(|mid| match side {
            Side::Buy => price >= mid,
            Side::Sell => price <= mid,
        });
        if post_only && crosses {
            Self::emit(
                &inner,
                ExecEvent::Reject {
                    cl_ord_id: cl_ord_id.to_string(),
                    reason: "post only would cross".to_string(),
                },
            );
            return Ok(());
        }

        let order_id = format!("P-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        inner.orders.insert(
            order_id.clone(),
            RestingOrder {
                order_id: order_id.clone(),
                cl_ord_id: cl_ord_id.to_string(),
                side,
                price,
                qty,
                filled: Qty::ZERO,
            },
        );
        inner.by_cl.insert(cl_ord_id.to_string(), order_id.clone());
        Self::emit(
            &inner,
            ExecEvent::NewAck {
                cl_ord_id: cl_ord_id.to_string(),
                order_id,
            },
        );
        Ok(())
    }

    async fn amend_order(
        &self,
        order_id: &str,
        new_price: Option<Price>,
        new_qty: Option<Qty>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.orders.get_mut(order_id) {
            Some(order) => {
                if let Some(p) = new_price {
                    order.price = p;
                }
                if let Some(q) = new_qty {
                    order.qty = q + order.filled;
                }
                Self::emit(
                    &inner,
                    ExecEvent::AmendAck {
                        order_id: order_id.to_string(),
                    },
                );
            }
            None => Self::emit(
                &inner,
                ExecEvent::AmendReject {
                    order_id: order_id.to_string(),
                    reason: "unknown order".to_string(),
                },
            ),
        }
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(order) = inner.orders.remove(order_id) {
            inner.by_cl.remove(&order.cl_ord_id);
        }
        Self::emit(
            &inner,
            ExecEvent::CancelAck {
                order_id: order_id.to_string(),
            },
        );
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner.orders.keys().cloned().collect();
        inner.orders.clear();
        inner.by_cl.clear();
        for order_id in ids {
            Self::emit(&inner, ExecEvent::Canceled { order_id });
        }
        Ok(())
    }

    async fn cancel_after(&self, timeout_sec: u32) -> Result<()> {
        self.inner.lock().cancel_after_sec = timeout_sec;
        Ok(())
    }

    async fn subscribe_executions(
        &self,
        _snap_orders: bool,
    ) -> Result<(Vec<OpenOrder>, mpsc::Receiver<ExecEvent>)> {
        let (tx, rx) = mpsc::channel(1024);
        let mut inner = self.inner.lock();
        inner.events = Some(tx);
        let snapshot = inner
            .orders
            .values()
            .map(|o| OpenOrder {
                order_id: o.order_id.clone(),
                cl_ord_id: Some(o.cl_ord_id.clone()),
                side: o.side,
                price: o.price,
                qty: o.qty,
                filled_qty: o.filled,
            })
            .collect();
        Ok((snapshot, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(rx: &mut mpsc::Receiver<ExecEvent>) -> Vec<ExecEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_add_ack_and_fill_on_cross() {
        let session = PaperSession::default();
        let (_, mut rx) = session.subscribe_executions(true).await.unwrap();
        session.on_mid(Price::new(dec!(50000)), Utc::now());

        session
            .add_order("CL-1", Side::Buy, Price::new(dec!(49800)), Qty::new(dec!(0.01)), true)
            .await
            .unwrap();
        let events = drain(&mut rx).await;
        assert!(matches!(events[0], ExecEvent::NewAck { .. }));

        // Mid trades down through the bid: full fill at the limit.
        session.on_mid(Price::new(dec!(49750)), Utc::now());
        let events = drain(&mut rx).await;
        match &events[0] {
            ExecEvent::Trade { price, qty, fee_usd, .. } => {
                assert_eq!(*price, Price::new(dec!(49800)));
                assert_eq!(*qty, Qty::new(dec!(0.01)));
                // 25 bps of 498.
                assert_eq!(*fee_usd, dec!(498) * dec!(0.0025));
            }
            other => panic!("expected trade, got {other:?}"),
        }
        assert_eq!(session.resting_count(), 0);
    }

    #[tokio::test]
    async fn test_post_only_reject() {
        let session = PaperSession::default();
        let (_, mut rx) = session.subscribe_executions(true).await.unwrap();
        session.on_mid(Price::new(dec!(50000)), Utc::now());

        session
            .add_order("CL-1", Side::Buy, Price::new(dec!(50100)), Qty::new(dec!(0.01)), true)
            .await
            .unwrap();
        let events = drain(&mut rx).await;
        assert!(matches!(events[0], ExecEvent::Reject { .. }));
        assert_eq!(session.resting_count(), 0);
    }

    #[tokio::test]
    async fn test_amend_and_cancel() {
        let session = PaperSession::default();
        let (_, mut rx) = session.subscribe_executions(true).await.unwrap();
        session.on_mid(Price::new(dec!(50000)), Utc::now());

        session
            .add_order("CL-1", Side::Sell, Price::new(dec!(50200)), Qty::new(dec!(0.01)), true)
            .await
            .unwrap();
        let events = drain(&mut rx).await;
        let ExecEvent::NewAck { order_id, .. } = &events[0] else {
            panic!("expected ack");
        };

        session
            .amend_order(order_id, Some(Price::new(dec!(50300))), None)
            .await
            .unwrap();
        assert!(matches!(drain(&mut rx).await[0], ExecEvent::AmendAck { .. }));

        session.cancel_order(order_id).await.unwrap();
        assert!(matches!(drain(&mut rx).await[0], ExecEvent::CancelAck { .. }));
        assert_eq!(session.resting_count(), 0);
    }

    #[tokio::test]
    async fn test_dms_arming() {
        let session = PaperSession::default();
        session.cancel_after(60).await.unwrap();
        assert_eq!(session.armed_cancel_after(), 60);
        session.cancel_after(0).await.unwrap();
        assert_eq!(session.armed_cancel_after(), 0);
    }
}
