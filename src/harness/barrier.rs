//! Counting barrier shared by the simulated clients.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

/// Releases every waiter once `target` arrivals have been counted.
#[derive(Debug)]
pub struct CountdownBarrier {
    target: usize,
    arrived: AtomicUsize,
    released: watch::Sender<bool>,
}

impl CountdownBarrier {
    /// A barrier with a target of zero starts out released.
    #[must_use]
    pub fn new(target: usize) -> Self {
        let (released, _) = watch::channel(target == 0);
        Self {
            target,
            arrived: AtomicUsize::new(0),
            released,
        }
    }

    /// Count one arrival. Exactly one caller, the one reaching the target,
    /// gets `true`; that call releases the barrier.
    pub fn arrive(&self) -> bool {
        let count = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        if count == self.target {
            self.released.send_replace(true);
            true
        } else {
            false
        }
    }

    /// Resolve once the barrier is released.
    pub async fn wait(&self) {
        let mut rx = self.released.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|released| *released).await;
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    #[must_use]
    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn target(&self) -> usize {
        self.target
    }
}
