//! Price-velocity circuit breaker.
//!
//! Keeps a ring of (timestamp, price) spanning the velocity window and
//! freezes trading when the absolute move across the window reaches the
//! freeze threshold, in either direction. Once frozen, the breaker only
//! resumes after the cooldown has elapsed AND the rolling velocity has
//! fallen below half the freeze threshold.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::{info, warn};

use steuergrid_core::Price;

use crate::config::RiskConfig;

/// Velocity-based trading freeze. Timestamps are caller-supplied
/// milliseconds on a monotonic clock.
#[derive(Debug)]
pub struct CircuitBreaker {
    window_ms: u64,
    freeze_pct: Decimal,
    cooldown_ms: u64,
    ring: VecDeque<(u64, Decimal)>,
    frozen: bool,
    frozen_at_ms: u64,
    pub freezes: u64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            window_ms: config.velocity_window_sec * 1000,
            freeze_pct: config.velocity_freeze_pct,
            cooldown_ms: config.velocity_cooldown_sec * 1000,
            ring: VecDeque::new(),
            frozen: false,
            frozen_at_ms: 0,
            freezes: 0,
        }
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Observe a price tick; returns the frozen state after the update.
    pub fn observe(&mut self, now_ms: u64, price: Price) -> bool {
        self.ring.push_back((now_ms, price.inner()));
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self
            .ring
            .front()
            .is_some_and(|(ts, _)| *ts < cutoff)
        {
            self.ring.pop_front();
        }

        let velocity = self.velocity();

        if self.frozen {
            let cooled = now_ms.saturating_sub(self.frozen_at_ms) >= self.cooldown_ms;
            if cooled && velocity < self.freeze_pct / Decimal::TWO {
                info!(velocity = %velocity, "Circuit breaker unfrozen");
                self.frozen = false;
            }
            return self.frozen;
        }

        if velocity >= self.freeze_pct {
            warn!(
                velocity = %velocity,
                threshold = %self.freeze_pct,
                "Circuit breaker FROZEN"
            );
            self.frozen = true;
            self.frozen_at_ms = now_ms;
            self.freezes += 1;
        }
        self.frozen
    }

    /// Absolute move across the ring relative to the oldest price.
    #[must_use]
    pub fn velocity(&self) -> Decimal {
        let (Some((_, oldest)), Some((_, newest))) = (self.ring.front(), self.ring.back()) else {
            return Decimal::ZERO;
        };
        if oldest.is_zero() {
            return Decimal::ZERO;
        }
        ((*newest - *oldest) / *oldest).abs()
    }
}
