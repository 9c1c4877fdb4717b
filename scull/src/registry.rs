//! Registry of well-known devices
//!
//! Built once from a [`ScullConfig`]:
//!
//! | name                       | controller  |
//! |----------------------------|-------------|
//! | `scull0` .. `scull{n-1}`   | `Plain`     |
//! | `scullsingle`              | `Exclusive` |
//! | `sculluid`                 | `Owner`     |
//! | `scullwuid`                | `Gated`     |
//! | `scullpriv`                | `Keyed`     |
//!
//! All devices share one [`BlockArena`], so the configured memory limit
//! covers them together.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::access::{Controller, Exclusive, Gated, KeyedPool, OwnerGate};
use crate::arena::BlockArena;
use crate::config::ScullConfig;
use crate::device::Device;
use crate::error::{Result, ScullError};
use crate::idgen::IdGen;
use crate::session::{OpenRequest, Session};

pub const SINGLE: &str = "scullsingle";
pub const UID: &str = "sculluid";
pub const WUID: &str = "scullwuid";
pub const PRIV: &str = "scullpriv";

pub struct Registry {
    config: ScullConfig,
    arena: BlockArena,
    controllers: HashMap<String, Arc<Controller>>,
    id_gen: IdGen,
}

impl Registry {
    #[must_use]
    pub fn new(config: ScullConfig) -> Self {
        let arena = BlockArena::new(config.memory_limit);
        let defaults = config.geometry();
        let device = |name: &str| Device::new(name, defaults, arena.clone());

        let mut controllers = HashMap::new();
        for i in 0..config.nr_devs {
            let name = format!("scull{i}");
            let controller = Controller::Plain(Arc::new(device(&name)));
            controllers.insert(name, Arc::new(controller));
        }
        controllers.insert(
            SINGLE.to_string(),
            Arc::new(Controller::Exclusive(Exclusive::new(device(SINGLE)))),
        );
        controllers.insert(
            UID.to_string(),
            Arc::new(Controller::Owner(OwnerGate::new(device(UID)))),
        );
        controllers.insert(
            WUID.to_string(),
            Arc::new(Controller::Gated(Gated::new(device(WUID)))),
        );
        controllers.insert(
            PRIV.to_string(),
            Arc::new(Controller::Keyed(KeyedPool::new(PRIV, defaults, arena.clone()))),
        );

        info!(
            devices = controllers.len(),
            quantum = defaults.quantum,
            qset = defaults.qset,
            memory_limit = ?config.memory_limit,
            "registry ready"
        );

        Self {
            config,
            arena,
            controllers,
            id_gen: IdGen::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ScullConfig {
        &self.config
    }

    #[must_use]
    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }

    /// Registered device names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn controller(&self, device_id: &str) -> Option<&Arc<Controller>> {
        self.controllers.get(device_id)
    }

    /// Open `device_id`
    ///
    /// The controller admits the caller (possibly waiting), then a
    /// write-only open empties the bound device. If emptying is interrupted
    /// the admission is released again.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown identifier
    /// - `Busy`, `Interrupted`, `OutOfMemory` from the controller
    /// - `Interrupted` from the truncating lock wait
    pub async fn open(&self, device_id: &str, request: OpenRequest) -> Result<Session> {
        let controller = self
            .controllers
            .get(device_id)
            .ok_or_else(|| ScullError::NotFound(device_id.to_string()))?;

        let device = controller.admit(&request.caller, &request.cancel).await?;
        let truncate = request.access.truncates();
        let session = Session::new(
            self.id_gen.get_next(),
            device_id,
            Arc::clone(controller),
            device,
            request,
        );
        debug!(
            session = %session.id(),
            device = %session.device().name(),
            kind = %controller.kind(),
            access = ?session.access(),
            uid = session.caller().uid,
            "opened"
        );

        if truncate {
            // On error the session is dropped, which releases the admission
            session.device().trim(session.cancel_token()).await?;
        }
        Ok(session)
    }

    /// Empty every device and destroy every keyed pool entry
    pub async fn teardown(&self) {
        for name in self.names() {
            if let Some(controller) = self.controllers.get(&name) {
                controller.teardown().await;
            }
        }
        info!(in_use = self.arena.in_use(), "registry torn down");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ScullConfig::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("devices", &self.names())
            .field("in_use", &self.arena.in_use())
            .finish_non_exhaustive()
    }
}
