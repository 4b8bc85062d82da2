//! Scoped, cancellable room timers.
//!
//! Each room holds at most one live timer per role (turn deadline, second
//! tick, debate clock, motion window). Arming always cancels the previous
//! timer first, and every fire carries the epoch it was armed under; a
//! command arriving with a stale epoch is a no-op against current state.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// One cancellable timer slot.
#[derive(Debug)]
pub struct ScopedTimer {
    name: &'static str,
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

impl ScopedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            epoch: 0,
            handle: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether a fire with `epoch` corresponds to the live timer.
    pub fn accepts(&self, epoch: u64) -> bool {
        self.is_armed() && epoch == self.epoch
    }

    /// Arm a one-shot fire after `delay`, superseding any previous timer.
    ///
    /// Returns the epoch the fire will carry. The command is delivered into
    /// the room's own queue, so it is serialized with everything else.
    pub fn arm_once<C, F>(&mut self, delay: Duration, tx: mpsc::Sender<C>, make: F) -> u64
    where
        C: Send + 'static,
        F: FnOnce(u64) -> C + Send + 'static,
    {
        self.cancel();
        let epoch = self.epoch;
        debug!(timer = self.name, epoch, ?delay, "timer armed");
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(make(epoch)).await;
        }));
        epoch
    }

    /// Arm a repeating fire every `period`, superseding any previous timer.
    pub fn arm_repeating<C, F>(&mut self, period: Duration, tx: mpsc::Sender<C>, make: F) -> u64
    where
        C: Send + 'static,
        F: Fn(u64) -> C + Send + 'static,
    {
        self.cancel();
        let epoch = self.epoch;
        debug!(timer = self.name, epoch, ?period, "repeating timer armed");
        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                if tx.send(make(epoch)).await.is_err() {
                    break;
                }
            }
        }));
        epoch
    }

    /// Cancel the live timer, if any. Fires already queued become stale.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        if let Some(handle) = self.handle.take() {
            debug!(timer = self.name, "timer cancelled");
            handle.abort();
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
