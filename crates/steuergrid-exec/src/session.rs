//! Exchange session seam.
//!
//! The engine never talks to the venue directly; it calls this trait.
//! Implementations own the WebSocket codec, authentication and the L2
//! book CRC validation (a checksum mismatch surfaces to the engine as
//! an `ExecEvent::BookChecksumMismatch` on the event stream).

use async_trait::async_trait;
use tokio::sync::mpsc;

use steuergrid_core::{ExecEvent, Price, Qty, Side};

use crate::error::Result;

/// An open order as reported by the venue's executions snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub order_id: String,
    pub cl_ord_id: Option<String>,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    pub filled_qty: Qty,
}

/// Async exchange session. All order entry is post-only.
#[async_trait]
pub trait ExchangeSession: Send + Sync {
    async fn add_order(
        &self,
        cl_ord_id: &str,
        side: Side,
        price: Price,
        qty: Qty,
        post_only: bool,
    ) -> Result<()>;

    async fn amend_order(
        &self,
        order_id: &str,
        new_price: Option<Price>,
        new_qty: Option<Qty>,
    ) -> Result<()>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn cancel_all(&self) -> Result<()>;

    /// Arm (or with 0, disarm) the venue-side dead-man's switch.
    async fn cancel_after(&self, timeout_sec: u32) -> Result<()>;

    /// Subscribe to the executions channel. With `snap_orders` the
    /// venue prefixes the stream with a snapshot of open orders, which
    /// is returned alongside the live event receiver.
    async fn subscribe_executions(
        &self,
        snap_orders: bool,
    ) -> Result<(Vec<OpenOrder>, mpsc::Receiver<ExecEvent>)>;
}
