use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::Caller;
use crate::device::Device;
use crate::error::{Result, ScullError};

/// Who holds an owner-gated device, and how many times
#[derive(Debug, Default)]
pub(crate) struct Ownership {
    owner: Option<u32>,
    count: usize,
}

impl Ownership {
    /// Free devices admit anyone; held ones admit the owner (by uid or
    /// euid) and privileged callers.
    pub(crate) fn permits(&self, caller: &Caller) -> bool {
        self.count == 0
            || self.owner == Some(caller.uid)
            || self.owner == Some(caller.euid)
            || caller.privileged
    }

    pub(crate) fn acquire(&mut self, caller: &Caller) {
        if self.count == 0 {
            self.owner = Some(caller.uid);
        }
        self.count += 1;
    }

    /// Drop one reference; returns true when the device became free
    pub(crate) fn release(&mut self, caller: &Caller) -> bool {
        if self.count == 0 {
            warn!(uid = caller.uid, "release of a device nobody holds");
            return false;
        }
        self.count -= 1;
        if self.count > 0 {
            return false;
        }
        self.owner = None;
        true
    }

    pub(crate) fn owner(&self) -> Option<u32> {
        self.owner
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }
}

/// Single-user device: the first opener becomes the owner, openers with
/// another identity fail with `Busy` until every owner session is closed
#[derive(Debug)]
pub struct OwnerGate {
    device: Arc<Device>,
    state: Mutex<Ownership>,
}

impl OwnerGate {
    #[must_use]
    pub fn new(device: Device) -> Self {
        Self {
            device: Arc::new(device),
            state: Mutex::new(Ownership::default()),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Current owner uid, if the device is held
    #[must_use]
    pub fn owner(&self) -> Option<u32> {
        self.state.lock().owner()
    }

    /// Number of open sessions
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().count()
    }

    /// # Errors
    ///
    /// Returns `Busy` if another identity holds the device.
    pub fn open(&self, caller: &Caller) -> Result<Arc<Device>> {
        let mut state = self.state.lock();
        if !state.permits(caller) {
            debug!(
                device = %self.device.name(),
                uid = caller.uid,
                owner = ?state.owner(),
                "held by another user"
            );
            return Err(ScullError::Busy);
        }
        state.acquire(caller);
        Ok(Arc::clone(&self.device))
    }

    pub fn release(&self, caller: &Caller) {
        self.state.lock().release(caller);
    }
}
