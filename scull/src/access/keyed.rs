//! Keyed pool: one private device per caller key
//!
//! Devices are created on the first open with an unseen key and live until
//! [`KeyedPool::teardown`]. Closing a session leaves the device and its data
//! in the pool for the next open with the same key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::Caller;
use crate::arena::{BlockArena, Reservation};
use crate::config::Geometry;
use crate::device::Device;
use crate::error::{Result, ScullError};

struct PoolEntry {
    device: Arc<Device>,
    _reservation: Reservation,
}

/// Pool of private devices, indexed by caller key
///
/// The pool lock only covers lookup and insertion; it is released before
/// the caller takes any device lock.
pub struct KeyedPool {
    name: String,
    defaults: Geometry,
    arena: BlockArena,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl KeyedPool {
    #[must_use]
    pub fn new(name: &str, defaults: Geometry, arena: BlockArena) -> Self {
        Self {
            name: name.to_string(),
            defaults,
            arena,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Find or create the device for `caller.key`
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if a new entry cannot be allocated.
    pub fn open(&self, caller: &Caller) -> Result<Arc<Device>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&caller.key) {
            return Ok(Arc::clone(&entry.device));
        }

        let reservation = self.arena.alloc_pool_entry()?;
        entries
            .try_reserve(1)
            .map_err(|_| ScullError::OutOfMemory)?;
        let device = Arc::new(Device::new(
            &format!("{}:{}", self.name, caller.key),
            self.defaults,
            self.arena.clone(),
        ));
        entries.insert(
            caller.key.clone(),
            PoolEntry {
                device: Arc::clone(&device),
                _reservation: reservation,
            },
        );
        debug!(pool = %self.name, key = %caller.key, entries = entries.len(), "created private device");
        Ok(device)
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys with a live entry, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Trim and destroy every entry
    ///
    /// The pool is emptied atomically; the devices are trimmed afterwards,
    /// outside the pool lock. Sessions still bound to one of them see an
    /// empty device.
    pub async fn teardown(&self) {
        let drained: Vec<(String, PoolEntry)> = self.entries.lock().drain().collect();
        debug!(pool = %self.name, entries = drained.len(), "tearing down");
        for (_key, entry) in drained {
            let device = &entry.device;
            device.lock_uninterruptible().await.trim(device.defaults());
        }
    }
}

impl std::fmt::Debug for KeyedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyedPool(name={}, entries={})", self.name, self.len())
    }
}
