use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::owner::Ownership;
use super::Caller;
use crate::device::Device;
use crate::error::{Result, ScullError};
use crate::wait_queue::{WaitOutcome, WaitQueue, WaitTicket};

#[derive(Debug, Default)]
struct GateState {
    ownership: Ownership,
    waiters: WaitQueue,
}

/// Blocking single-user device
///
/// Admits the same callers as [`super::OwnerGate`]. Anybody else waits
/// until the last owner session closes, then re-checks. One waiter is
/// woken per release.
#[derive(Debug)]
pub struct Gated {
    device: Arc<Device>,
    state: Mutex<GateState>,
}

impl Gated {
    #[must_use]
    pub fn new(device: Device) -> Self {
        Self {
            device: Arc::new(device),
            state: Mutex::new(GateState::default()),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub fn owner(&self) -> Option<u32> {
        self.state.lock().ownership.owner()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().ownership.count()
    }

    /// Registered waiters, including cancelled ones not yet discarded
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// # Errors
    ///
    /// Returns `Interrupted` if `cancel` fires while waiting.
    pub async fn open(&self, caller: &Caller, cancel: &CancellationToken) -> Result<Arc<Device>> {
        loop {
            // Check and enqueue under one lock, see `crate::wait_queue`
            let ticket = {
                let mut state = self.state.lock();
                if state.ownership.permits(caller) {
                    state.ownership.acquire(caller);
                    return Ok(Arc::clone(&self.device));
                }
                debug!(
                    device = %self.device.name(),
                    uid = caller.uid,
                    owner = ?state.ownership.owner(),
                    "waiting for owner to close"
                );
                state.waiters.enqueue(caller.uid)
            };

            let mut waiting = Waiting { gate: self, ticket };
            if waiting.ticket.wait(cancel).await == WaitOutcome::Cancelled {
                debug!(device = %self.device.name(), uid = caller.uid, "open interrupted");
                return Err(ScullError::Interrupted);
            }
        }
    }

    pub fn release(&self, caller: &Caller) {
        let mut state = self.state.lock();
        if state.ownership.release(caller) {
            state.waiters.wake_one();
        }
    }
}

/// One pending wait of [`Gated::open`]
///
/// Dropped when the wait ends, including when the open future itself is
/// dropped. A wakeup that arrived but was not used goes to the next waiter.
struct Waiting<'a> {
    gate: &'a Gated,
    ticket: WaitTicket,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.ticket.withdraw() {
            debug!(device = %self.gate.device.name(), "passing unused wakeup on");
            self.gate.state.lock().waiters.wake_one();
        }
    }
}
