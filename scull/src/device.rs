//! Device: one quantum store behind a cancellable lock

use std::fmt;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::arena::BlockArena;
use crate::config::Geometry;
use crate::error::{Result, ScullError};
use crate::qset::QuantumStore;

/// One logical storage instance
///
/// All reads, writes and trims of the store go through [`Device::lock`].
/// Different devices never share a lock, so they proceed in parallel.
pub struct Device {
    name: String,
    defaults: Geometry,
    store: Mutex<QuantumStore>,
}

impl Device {
    #[must_use]
    pub fn new(name: &str, defaults: Geometry, arena: BlockArena) -> Self {
        Self {
            name: name.to_string(),
            defaults,
            store: Mutex::new(QuantumStore::new(defaults, arena)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sizing restored by trim
    #[must_use]
    pub fn defaults(&self) -> Geometry {
        self.defaults
    }

    /// Acquire the device lock
    ///
    /// A pending cancellation wins over a free lock.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if `cancel` fires before the lock is acquired.
    /// The lock is not held in that case.
    pub async fn lock(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, QuantumStore>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                trace!(device = %self.name, "lock wait interrupted");
                Err(ScullError::Interrupted)
            }
            guard = self.store.lock() => Ok(guard),
        }
    }

    /// Acquire the lock without a way to cancel; for teardown
    pub async fn lock_uninterruptible(&self) -> MutexGuard<'_, QuantumStore> {
        self.store.lock().await
    }

    /// Empty the device under its lock
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the lock wait is cancelled.
    pub async fn trim(&self, cancel: &CancellationToken) -> Result<()> {
        self.lock(cancel).await?.trim(self.defaults);
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.store.try_lock() {
            Ok(store) => write!(f, "Device(name={}, store={store:?})", self.name),
            Err(_) => write!(f, "Device(name={}, store=<locked>)", self.name),
        }
    }
}
