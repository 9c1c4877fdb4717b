use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::device::Device;
use crate::error::{Result, ScullError};

/// Single-open device: at most one session at a time, no queueing
#[derive(Debug)]
pub struct Exclusive {
    device: Arc<Device>,
    available: AtomicBool,
}

impl Exclusive {
    #[must_use]
    pub fn new(device: Device) -> Self {
        Self {
            device: Arc::new(device),
            available: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// # Errors
    ///
    /// Returns `Busy` if the device is already open.
    pub fn open(&self) -> Result<Arc<Device>> {
        if self
            .available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(device = %self.device.name(), "already open");
            return Err(ScullError::Busy);
        }
        Ok(Arc::clone(&self.device))
    }

    pub fn release(&self) {
        self.available.store(true, Ordering::Release);
    }
}
