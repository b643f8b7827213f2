//! Engine counters.
//!
//! Cheap atomic counters the strategy loop and order manager bump;
//! the CLI status line and the optional metrics exporter read them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared engine counters. Clone-free: wrap in `Arc` at the call site.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub ticks: AtomicU64,
    pub commands_issued: AtomicU64,
    pub ticks_skipped_pause: AtomicU64,
    pub ticks_skipped_frozen: AtomicU64,
    pub fills: AtomicU64,
    pub rejects: AtomicU64,
    pub tax_vetoes: AtomicU64,
    pub ledger_saves: AtomicU64,
}

impl EngineCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
