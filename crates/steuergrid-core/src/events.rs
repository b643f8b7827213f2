//! Execution events delivered by the exchange session.
//!
//! Events arrive on a bounded queue in arrival order. The venue may
//! acknowledge across slots out of order; the engine never assumes
//! ack ordering between slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Price, Qty};
use crate::types::Side;

/// Normalized fill forwarded to the FIFO ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub trade_id: String,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
    /// Fee in USD for this fill.
    pub fee_usd: rust_decimal::Decimal,
    pub ts: DateTime<Utc>,
}

/// Execution event from the executions channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecEvent {
    /// add_order accepted; the venue assigned an order id.
    NewAck {
        cl_ord_id: String,
        order_id: String,
    },
    /// amend_order accepted; desired params are now live.
    AmendAck { order_id: String },
    /// amend_order rejected; the resting order is unchanged.
    AmendReject { order_id: String, reason: String },
    /// cancel_order accepted.
    CancelAck { order_id: String },
    /// Order cancelled venue-side (DMS fire, cancel_all).
    Canceled { order_id: String },
    /// A (partial) fill.
    Trade {
        order_id: String,
        trade_id: String,
        price: Price,
        qty: Qty,
        fee_usd: rust_decimal::Decimal,
        ts: DateTime<Utc>,
    },
    /// add_order rejected (post-only cross, insufficient funds, ...).
    Reject { cl_ord_id: String, reason: String },
    /// Authoritative per-pair rate counter piggybacked on an execution
    /// message.
    RateCount { count: f64 },
    /// L2 book failed its checksum; trading pauses until the session
    /// reports the book re-synced.
    BookChecksumMismatch,
    /// Book re-snapshot complete after a checksum mismatch.
    BookSynced,
}
