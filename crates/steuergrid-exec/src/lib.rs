//! Exchange-facing execution layer.
//!
//! - [`ExchangeSession`]: async seam to the venue; the engine depends
//!   only on this trait
//! - [`RateLimiter`]: local mirror of the venue's per-pair rate counter
//! - [`OrderManager`]: per-slot amend-first state machine
//! - [`Heartbeat`]: dead-man's-switch re-arming

pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod rate_limiter;
pub mod session;

pub use error::{ExecError, Result};
pub use heartbeat::Heartbeat;
pub use manager::{DesiredOrder, OrderCommand, OrderManager, OrderSlot, SnapshotOrder};
pub use rate_limiter::{CommandClass, RateLimiter};
pub use session::{ExchangeSession, OpenOrder};
