//! Dead-man's-switch heartbeat.
//!
//! Re-arms the venue-side `cancel_after` on an interval. If this loop
//! stalls or the connection drops, the venue cancels every resting
//! order once the timeout lapses, so a wedged bot cannot leave a stale
//! grid in the book.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::session::ExchangeSession;

/// Heartbeat loop configuration and driver.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub interval_sec: u64,
    pub cancel_after_timeout_sec: u32,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval_sec: 20,
            cancel_after_timeout_sec: 60,
        }
    }
}

impl Heartbeat {
    /// Arm the switch once, then keep re-arming until `shutdown` flips
    /// to true. The final disarm (`cancel_after(0)`) is the lifecycle
    /// coordinator's job, not ours.
    pub async fn run(
        &self,
        session: Arc<dyn ExchangeSession>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = Duration::from_secs(self.interval_sec);
        loop {
            match session.cancel_after(self.cancel_after_timeout_sec).await {
                Ok(()) => debug!(timeout_sec = self.cancel_after_timeout_sec, "DMS re-armed"),
                Err(e) => warn!(error = %e, "DMS re-arm failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Heartbeat stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::session::OpenOrder;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use steuergrid_core::{ExecEvent, Price, Qty, Side};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSession {
        cancel_after_calls: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ExchangeSession for RecordingSession {
        async fn add_order(
            &self,
            _cl_ord_id: &str,
            _side: Side,
            _price: Price,
            _qty: Qty,
            _post_only: bool,
        ) -> Result<()> {
            Ok(())
        }

        async fn amend_order(
            &self,
            _order_id: &str,
            _new_price: Option<Price>,
            _new_qty: Option<Qty>,
        ) -> Result<()> {
            Ok(())
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            Ok(())
        }

        async fn cancel_all(&self) -> Result<()> {
            Ok(())
        }

        async fn cancel_after(&self, timeout_sec: u32) -> Result<()> {
            self.cancel_after_calls.lock().push(timeout_sec);
            Ok(())
        }

        async fn subscribe_executions(
            &self,
            _snap_orders: bool,
        ) -> Result<(Vec<OpenOrder>, mpsc::Receiver<ExecEvent>)> {
            let (_tx, rx) = mpsc::channel(1);
            Ok((Vec::new(), rx))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearms_on_interval_until_shutdown() {
        let session = Arc::new(RecordingSession::default());
        let (tx, rx) = watch::channel(false);

        let hb = Heartbeat {
            interval_sec: 20,
            cancel_after_timeout_sec: 60,
        };
        let task = tokio::spawn({
            let session = session.clone();
            async move { hb.run(session, rx).await }
        });

        // First arm is immediate; two more after 40 s of virtual time.
        tokio::time::sleep(Duration::from_millis(41_000)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        let calls = session.cancel_after_calls.lock().clone();
        assert!(calls.len() >= 3, "expected >= 3 re-arms, got {calls:?}");
        assert!(calls.iter().all(|&t| t == 60));
    }
}
