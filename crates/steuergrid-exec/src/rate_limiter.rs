//! Local mirror of the venue's per-pair rate counter.
//!
//! The venue decays its counter continuously and reports the
//! authoritative value inside execution events. Between updates we keep
//! a conservative local estimate: admission requires the post-command
//! counter to stay within a headroom fraction of the cap, and server
//! reconciliation takes the maximum of both views so a drifted local
//! estimate can never open headroom that is not there.
//!
//! Exhaustion is not an error; deferred intents retry next tick.
//! Cancels cost nothing and are never throttled.

use parking_lot::Mutex;
use tracing::debug;

/// Priority classes for order commands, highest first. On contention
/// the strategy dispatches cancels before risk amends before normal
/// amends before news.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandClass {
    Cancel,
    RiskAmend,
    Amend,
    New,
}

impl CommandClass {
    /// Rate counter cost of a command of this class.
    #[must_use]
    pub fn cost(&self) -> f64 {
        match self {
            Self::Cancel => 0.0,
            Self::RiskAmend | Self::Amend => 0.5,
            Self::New => 1.0,
        }
    }
}

#[derive(Debug)]
struct State {
    count: f64,
    last_decay_ms: u64,
}

/// Decaying rate counter with headroom-gated admission.
#[derive(Debug)]
pub struct RateLimiter {
    max_counter: f64,
    decay_per_sec: f64,
    headroom_pct: f64,
    state: Mutex<State>,
    deferrals: Mutex<u64>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_counter: f64, decay_per_sec: f64, headroom_pct: f64) -> Self {
        Self {
            max_counter,
            decay_per_sec,
            headroom_pct,
            state: Mutex::new(State {
                count: 0.0,
                last_decay_ms: 0,
            }),
            deferrals: Mutex::new(0),
        }
    }

    /// Kraken Pro tier defaults: cap 180, decay 3.75/s, 80% headroom.
    #[must_use]
    pub fn kraken_pro() -> Self {
        Self::new(180.0, 3.75, 0.80)
    }

    fn threshold(&self) -> f64 {
        self.max_counter * self.headroom_pct
    }

    fn decay(&self, now_ms: u64) {
        let mut state = self.state.lock();
        if now_ms > state.last_decay_ms {
            let elapsed = (now_ms - state.last_decay_ms) as f64 / 1000.0;
            state.count = (state.count - elapsed * self.decay_per_sec).max(0.0);
            state.last_decay_ms = now_ms;
        }
    }

    /// Current counter estimate after decay.
    #[must_use]
    pub fn estimated_count(&self, now_ms: u64) -> f64 {
        self.decay(now_ms);
        self.state.lock().count
    }

    /// Try to admit a command. On success the cost is charged. Cancels
    /// always pass.
    pub fn admit(&self, class: CommandClass, now_ms: u64) -> bool {
        let cost = class.cost();
        if cost == 0.0 {
            return true;
        }
        self.decay(now_ms);
        let mut state = self.state.lock();
        if state.count + cost <= self.threshold() {
            state.count += cost;
            true
        } else {
            *self.deferrals.lock() += 1;
            debug!(
                class = ?class,
                count = state.count,
                threshold = self.threshold(),
                "Rate limiter deferred command"
            );
            false
        }
    }

    /// Commands deferred so far.
    #[must_use]
    pub fn deferrals(&self) -> u64 {
        *self.deferrals.lock()
    }

    /// Reconcile with the authoritative counter from the executions
    /// channel: take the maximum of both views.
    pub fn reconcile_server(&self, server_count: f64, now_ms: u64) {
        self.decay(now_ms);
        let mut state = self.state.lock();
        state.count = state.count.max(server_count);
        state.last_decay_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_within_headroom() {
        let rl = RateLimiter::new(10.0, 0.0, 0.8);
        // Threshold is 8: eight news fit, the ninth defers.
        for _ in 0..8 {
            assert!(rl.admit(CommandClass::New, 0));
        }
        assert!(!rl.admit(CommandClass::New, 0));
        assert_eq!(rl.deferrals(), 1);
    }

    #[test]
    fn test_counter_never_exceeds_headroom() {
        let rl = RateLimiter::new(10.0, 0.0, 0.8);
        for _ in 0..20 {
            rl.admit(CommandClass::New, 0);
            assert!(rl.estimated_count(0) <= 8.0);
        }
    }

    #[test]
    fn test_cancels_always_pass() {
        let rl = RateLimiter::new(10.0, 0.0, 0.8);
        for _ in 0..8 {
            rl.admit(CommandClass::New, 0);
        }
        assert!(!rl.admit(CommandClass::New, 0));
        assert!(rl.admit(CommandClass::Cancel, 0));
        // Cancels are free: the counter is unchanged.
        assert_eq!(rl.estimated_count(0), 8.0);
    }

    #[test]
    fn test_decay_restores_headroom() {
        let rl = RateLimiter::new(10.0, 2.0, 0.8);
        for _ in 0..8 {
            assert!(rl.admit(CommandClass::New, 0));
        }
        assert!(!rl.admit(CommandClass::New, 0));
        // Two seconds at 2/s decays 4 units.
        assert!((rl.estimated_count(2_000) - 4.0).abs() < 1e-9);
        assert!(rl.admit(CommandClass::New, 2_000));
    }

    #[test]
    fn test_amend_cheaper_than_new() {
        assert!(CommandClass::Amend.cost() < CommandClass::New.cost());
        assert_eq!(CommandClass::Cancel.cost(), 0.0);
    }

    #[test]
    fn test_server_reconcile_takes_maximum() {
        let rl = RateLimiter::new(180.0, 3.75, 0.8);
        rl.admit(CommandClass::New, 0);
        // Server sees much more usage than we tracked.
        rl.reconcile_server(100.0, 0);
        assert_eq!(rl.estimated_count(0), 100.0);
        // Server reporting less than local keeps the local estimate.
        rl.reconcile_server(50.0, 0);
        assert_eq!(rl.estimated_count(0), 100.0);
    }

    #[test]
    fn test_priority_ordering() {
        let mut classes = [
            CommandClass::New,
            CommandClass::Cancel,
            CommandClass::Amend,
            CommandClass::RiskAmend,
        ];
        classes.sort();
        assert_eq!(
            classes,
            [
                CommandClass::Cancel,
                CommandClass::RiskAmend,
                CommandClass::Amend,
                CommandClass::New,
            ]
        );
    }
}
