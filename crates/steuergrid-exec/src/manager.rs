//! Amend-first order slot state machine.
//!
//! Each logical grid position maps to one [`OrderSlot`]. The machine
//! enforces:
//!   - never stack commands on a pending slot (venue sequencing is not
//!     guaranteed)
//!   - prefer amend over cancel+add to keep queue priority
//!   - track cl_ord_id for reconciliation after reconnect
//!   - forward fills to the FIFO ledger owner
//!
//! Transitions:
//!   EMPTY -> PENDING_NEW (add sent)
//!   PENDING_NEW -> LIVE (new ack)
//!   LIVE -> AMEND_PENDING (amend sent) -> LIVE (ack or reject)
//!   LIVE -> CANCEL_PENDING (cancel sent) -> EMPTY (ack)
//!   LIVE -> EMPTY (fully filled)
//!   PENDING_NEW/AMEND_PENDING -> timeout -> CANCEL_PENDING (stale)

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use steuergrid_core::{ExecEvent, Fill, Price, Qty, Side, SlotState, BTC_LOT_STEP, USD_TICK};

use crate::rate_limiter::CommandClass;
use crate::session::OpenOrder;

/// What the strategy wants resting at one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredOrder {
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

/// A command the manager wants dispatched to the exchange session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
    Add {
        slot: usize,
        cl_ord_id: String,
        side: Side,
        price: Price,
        qty: Qty,
    },
    Amend {
        slot: usize,
        order_id: String,
        new_price: Option<Price>,
        new_qty: Option<Qty>,
    },
    Cancel {
        slot: usize,
        order_id: String,
    },
}

impl OrderCommand {
    #[must_use]
    pub fn class(&self) -> CommandClass {
        match self {
            Self::Add { .. } => CommandClass::New,
            Self::Amend { .. } => CommandClass::Amend,
            Self::Cancel { .. } => CommandClass::Cancel,
        }
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        match self {
            Self::Add { slot, .. } | Self::Amend { slot, .. } | Self::Cancel { slot, .. } => *slot,
        }
    }
}

/// State for a single order slot.
#[derive(Debug, Clone, Default)]
pub struct OrderSlot {
    pub index: usize,
    pub state: SlotState,
    pub side: Option<Side>,
    pub order_id: Option<String>,
    pub cl_ord_id: Option<String>,
    pub price: Price,
    pub qty: Qty,
    pub filled_qty: Qty,
    pub pending_since_ms: u64,
    desired: Option<DesiredOrder>,
    /// Set when an amend was rejected: next tick replaces via
    /// cancel+add instead of amending again.
    force_replace: bool,
}

impl OrderSlot {
    #[must_use]
    pub fn remaining_qty(&self) -> Qty {
        self.qty - self.filled_qty
    }

    fn clear(&mut self) {
        let index = self.index;
        *self = OrderSlot {
            index,
            ..OrderSlot::default()
        };
    }
}

/// Re-export for reconciliation call sites.
pub type SnapshotOrder = OpenOrder;

/// Slot table and event router.
#[derive(Debug)]
pub struct OrderManager {
    slots: Vec<OrderSlot>,
    by_order_id: HashMap<String, usize>,
    by_cl_ord_id: HashMap<String, usize>,
    pending_timeout_ms: u64,
    price_eps: Decimal,
    qty_eps: Decimal,
    ledger_mismatch: bool,

    pub orders_placed: u64,
    pub orders_amended: u64,
    pub orders_cancelled: u64,
    pub orders_filled: u64,
    pub rejects: u64,
    pub amend_rejects: u64,
    pub timeout_cancels: u64,
}

impl OrderManager {
    /// Pending command timeout per the venue's observed ack latency.
    pub const DEFAULT_PENDING_TIMEOUT_MS: u64 = 1500;

    #[must_use]
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: (0..num_slots)
                .map(|index| OrderSlot {
                    index,
                    ..OrderSlot::default()
                })
                .collect(),
            by_order_id: HashMap::new(),
            by_cl_ord_id: HashMap::new(),
            pending_timeout_ms: Self::DEFAULT_PENDING_TIMEOUT_MS,
            price_eps: USD_TICK,
            qty_eps: BTC_LOT_STEP,
            ledger_mismatch: false,
            orders_placed: 0,
            orders_amended: 0,
            orders_cancelled: 0,
            orders_filled: 0,
            rejects: 0,
            amend_rejects: 0,
            timeout_cancels: 0,
        }
    }

    #[must_use]
    pub fn slots(&self) -> &[OrderSlot] {
        &self.slots
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Live)
            .count()
    }

    /// True after a sell fill failed to consume from the ledger. No
    /// further trading until an operator acknowledges.
    #[must_use]
    pub fn ledger_mismatch(&self) -> bool {
        self.ledger_mismatch
    }

    pub fn flag_ledger_mismatch(&mut self) {
        if !self.ledger_mismatch {
            error!("LEDGER MISMATCH: trading halted until operator acknowledgement");
        }
        self.ledger_mismatch = true;
    }

    pub fn acknowledge_ledger_mismatch(&mut self) {
        info!("Ledger mismatch acknowledged by operator");
        self.ledger_mismatch = false;
    }

    /// Diff desired levels against the slot table and emit commands.
    /// `desired[i]` pairs with slot `i`; slots beyond the list are
    /// treated as unwanted. At most one command per slot per tick, and
    /// pending slots are left alone until ack or timeout.
    pub fn reconcile_desired(
        &mut self,
        desired: &[Option<DesiredOrder>],
        now_ms: u64,
    ) -> Vec<OrderCommand> {
        let mut commands = Vec::new();
        for i in 0..self.slots.len() {
            let want = desired.get(i).copied().flatten();
            if let Some(cmd) = self.reconcile_slot(i, want, now_ms) {
                commands.push(cmd);
            }
        }
        commands
    }

    fn reconcile_slot(
        &mut self,
        i: usize,
        want: Option<DesiredOrder>,
        now_ms: u64,
    ) -> Option<OrderCommand> {
        let timeout = self.pending_timeout_ms;
        let price_eps = self.price_eps;
        let qty_eps = self.qty_eps;

        let slot = &mut self.slots[i];
        slot.desired = want;

        match slot.state {
            SlotState::Empty => {
                let d = want?;
                let cl_ord_id = Uuid::new_v4().to_string();
                slot.state = SlotState::PendingNew;
                slot.pending_since_ms = now_ms;
                slot.side = Some(d.side);
                slot.price = d.price;
                slot.qty = d.qty;
                slot.filled_qty = Qty::ZERO;
                slot.cl_ord_id = Some(cl_ord_id.clone());
                slot.order_id = None;
                slot.force_replace = false;
                self.by_cl_ord_id.insert(cl_ord_id.clone(), i);
                self.orders_placed += 1;
                Some(OrderCommand::Add {
                    slot: i,
                    cl_ord_id,
                    side: d.side,
                    price: d.price,
                    qty: d.qty,
                })
            }

            SlotState::PendingNew | SlotState::AmendPending => {
                if now_ms.saturating_sub(slot.pending_since_ms) <= timeout {
                    return None;
                }
                self.timeout_cancels += 1;
                warn!(slot = i, state = ?slot.state, "Pending timeout, forcing cancel");
                if let Some(order_id) = slot.order_id.clone() {
                    slot.state = SlotState::CancelPending;
                    slot.pending_since_ms = now_ms;
                    Some(OrderCommand::Cancel { slot: i, order_id })
                } else {
                    // No venue handle to cancel; free the slot and let
                    // any late ack resolve via cl_ord_id routing.
                    let stale = slot.cl_ord_id.take();
                    slot.clear();
                    if let Some(cl) = stale {
                        self.by_cl_ord_id.remove(&cl);
                    }
                    None
                }
            }

            SlotState::CancelPending => None,

            SlotState::Live => {
                let order_id = slot.order_id.clone()?;
                let Some(d) = want else {
                    slot.state = SlotState::CancelPending;
                    slot.pending_since_ms = now_ms;
                    self.orders_cancelled += 1;
                    return Some(OrderCommand::Cancel { slot: i, order_id });
                };

                // Side flips and rejected amends replace via
                // cancel now, add next tick.
                if slot.side != Some(d.side) || slot.force_replace {
                    slot.state = SlotState::CancelPending;
                    slot.pending_since_ms = now_ms;
                    slot.force_replace = false;
                    self.orders_cancelled += 1;
                    return Some(OrderCommand::Cancel { slot: i, order_id });
                }

                let price_changed = (slot.price.inner() - d.price.inner()).abs() > price_eps;
                let qty_changed =
                    (slot.remaining_qty().inner() - d.qty.inner()).abs() > qty_eps;
                if !price_changed && !qty_changed {
                    return None;
                }

                slot.state = SlotState::AmendPending;
                slot.pending_since_ms = now_ms;
                self.orders_amended += 1;
                Some(OrderCommand::Amend {
                    slot: i,
                    order_id,
                    new_price: price_changed.then_some(d.price),
                    new_qty: qty_changed.then_some(d.qty),
                })
            }
        }
    }

    /// Route an execution event to its slot. Fills come back with the
    /// slot's side filled in for the ledger owner to consume.
    pub fn on_event(&mut self, event: &ExecEvent) -> Option<Fill> {
        match event {
            ExecEvent::NewAck { cl_ord_id, order_id } => {
                let i = self.by_cl_ord_id.get(cl_ord_id).copied()?;
                let slot = &mut self.slots[i];
                if slot.state == SlotState::PendingNew {
                    slot.state = SlotState::Live;
                    slot.order_id = Some(order_id.clone());
                    self.by_order_id.insert(order_id.clone(), i);
                    info!(slot = i, order_id = %order_id, price = %slot.price, "Slot LIVE");
                }
                None
            }

            ExecEvent::AmendAck { order_id } => {
                let i = self.by_order_id.get(order_id).copied()?;
                let slot = &mut self.slots[i];
                if slot.state == SlotState::AmendPending {
                    slot.state = SlotState::Live;
                    if let Some(d) = slot.desired {
                        slot.price = d.price;
                        slot.qty = d.qty + slot.filled_qty;
                    }
                    debug!(slot = i, order_id = %order_id, "Amend applied");
                }
                None
            }

            ExecEvent::AmendReject { order_id, reason } => {
                let i = self.by_order_id.get(order_id).copied()?;
                let slot = &mut self.slots[i];
                if slot.state == SlotState::AmendPending {
                    slot.state = SlotState::Live;
                    slot.force_replace = true;
                    self.amend_rejects += 1;
                    debug!(slot = i, reason = %reason, "Amend rejected, will replace");
                }
                None
            }

            ExecEvent::CancelAck { order_id } | ExecEvent::Canceled { order_id } => {
                let i = self.by_order_id.get(order_id).copied()?;
                info!(slot = i, order_id = %order_id, "Slot cancelled");
                self.release_slot(i);
                None
            }

            ExecEvent::Trade {
                order_id,
                trade_id,
                price,
                qty,
                fee_usd,
                ts,
            } => {
                let Some(i) = self.by_order_id.get(order_id).copied() else {
                    warn!(order_id = %order_id, "Fill for unknown order");
                    return None;
                };
                let slot = &mut self.slots[i];
                let side = slot.side?;
                slot.filled_qty = slot.filled_qty + *qty;
                let full = slot.filled_qty.inner() >= slot.qty.inner();
                info!(
                    slot = i,
                    order_id = %order_id,
                    qty = %qty,
                    price = %price,
                    full,
                    "Fill"
                );
                if full {
                    self.orders_filled += 1;
                    self.release_slot(i);
                }
                Some(Fill {
                    order_id: order_id.clone(),
                    trade_id: trade_id.clone(),
                    side,
                    price: *price,
                    qty: *qty,
                    fee_usd: *fee_usd,
                    ts: *ts,
                })
            }

            ExecEvent::Reject { cl_ord_id, reason } => {
                let i = self.by_cl_ord_id.get(cl_ord_id).copied()?;
                self.rejects += 1;
                debug!(slot = i, reason = %reason, "Order rejected");
                // Revert to the prior non-pending state: a rejected add
                // leaves the slot empty.
                self.release_slot(i);
                None
            }

            ExecEvent::RateCount { .. }
            | ExecEvent::BookChecksumMismatch
            | ExecEvent::BookSynced => None,
        }
    }

    /// Reconcile the slot table against the venue's open-orders
    /// snapshot (startup and reconnect). Slots whose orders the venue
    /// no longer reports are reset; venue orders unknown to any slot
    /// are returned as orphans for cancellation.
    pub fn reconcile_snapshot(&mut self, open_orders: &[OpenOrder]) -> Vec<String> {
        let mut unclaimed: HashMap<&str, &OpenOrder> = open_orders
            .iter()
            .map(|o| (o.order_id.as_str(), o))
            .collect();

        for i in 0..self.slots.len() {
            let (state, order_id, cl_ord_id) = {
                let s = &self.slots[i];
                (s.state, s.order_id.clone(), s.cl_ord_id.clone())
            };
            if state == SlotState::Empty {
                continue;
            }

            let matched: Option<OpenOrder> = order_id
                .as_deref()
                .and_then(|id| unclaimed.remove(id))
                .cloned()
                .or_else(|| {
                    let cl = cl_ord_id.as_deref()?;
                    let id = unclaimed
                        .values()
                        .find(|o| o.cl_ord_id.as_deref() == Some(cl))?
                        .order_id
                        .clone();
                    unclaimed.remove(id.as_str()).cloned()
                });

            match matched {
                Some(snap) => {
                    if let Some(old) = &order_id {
                        if *old != snap.order_id {
                            self.by_order_id.remove(old);
                        }
                    }
                    self.by_order_id.insert(snap.order_id.clone(), i);
                    let slot = &mut self.slots[i];
                    slot.state = SlotState::Live;
                    slot.side = Some(snap.side);
                    slot.price = snap.price;
                    slot.qty = snap.qty;
                    slot.filled_qty = snap.filled_qty;
                    slot.order_id = Some(snap.order_id.clone());
                    info!(slot = i, order_id = %snap.order_id, "Slot reconciled from snapshot");
                }
                None => {
                    info!(slot = i, "Order gone during disconnect, slot reset");
                    self.release_slot(i);
                }
            }
        }

        let orphans: Vec<String> = unclaimed.keys().map(|id| (*id).to_string()).collect();
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "Orphan orders found, cancelling");
        }
        orphans
    }

    /// Cancel everything (shutdown path). Emits one cancel per slot
    /// holding a venue order id.
    pub fn cancel_all_commands(&mut self, now_ms: u64) -> Vec<OrderCommand> {
        let mut commands = Vec::new();
        for i in 0..self.slots.len() {
            let slot = &mut self.slots[i];
            if slot.state == SlotState::Empty || slot.state == SlotState::CancelPending {
                continue;
            }
            if let Some(order_id) = slot.order_id.clone() {
                slot.state = SlotState::CancelPending;
                slot.pending_since_ms = now_ms;
                self.orders_cancelled += 1;
                commands.push(OrderCommand::Cancel { slot: i, order_id });
            } else {
                slot.clear();
            }
        }
        commands
    }

    /// Roll back a command the rate limiter refused to admit. The slot
    /// returns to its pre-command state and the intent is recomputed
    /// next tick. Cancels cost nothing and are never deferred.
    pub fn defer(&mut self, cmd: &OrderCommand) {
        match cmd {
            OrderCommand::Add { slot, cl_ord_id, .. } => {
                self.by_cl_ord_id.remove(cl_ord_id);
                self.slots[*slot].clear();
                debug!(slot, "Add deferred by rate limiter");
            }
            OrderCommand::Amend { slot, .. } => {
                let s = &mut self.slots[*slot];
                if s.state == SlotState::AmendPending {
                    s.state = SlotState::Live;
                }
                debug!(slot, "Amend deferred by rate limiter");
            }
            OrderCommand::Cancel { .. } => {}
        }
    }

    fn release_slot(&mut self, i: usize) {
        let slot = &mut self.slots[i];
        if let Some(order_id) = slot.order_id.take() {
            self.by_order_id.remove(&order_id);
        }
        if let Some(cl) = slot.cl_ord_id.take() {
            self.by_cl_ord_id.remove(&cl);
        }
        slot.clear();
    }
}
