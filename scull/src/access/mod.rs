//! Admission control
//!
//! Every device identifier is backed by one [`Controller`]. The controller
//! decides whether an opener gets the device, and which device it gets:
//!
//! | variant     | open                                           | close               |
//! |-------------|------------------------------------------------|---------------------|
//! | `Plain`     | always                                         | nothing             |
//! | `Exclusive` | one opener at a time, else `Busy`              | frees the device    |
//! | `Owner`     | openers with the owner's identity, else `Busy` | drops one reference |
//! | `Gated`     | like `Owner`, but others wait                  | wakes one waiter    |
//! | `Keyed`     | a private device per caller key                | nothing             |

mod exclusive;
mod gated;
mod keyed;
mod owner;

pub use exclusive::Exclusive;
pub use gated::Gated;
pub use keyed::KeyedPool;
pub use owner::OwnerGate;

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::device::Device;
use crate::error::Result;

/// Key used by the keyed pool when the caller has none
pub const CONSOLE_KEY: &str = "console";

/// Access intent declared at open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Write-only opens empty the device before use
    #[must_use]
    pub fn truncates(self) -> bool {
        self == Self::WriteOnly
    }
}

/// Identity of the opener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub euid: u32,
    /// May open owner-gated devices regardless of the current owner
    pub privileged: bool,
    /// Selects the private device in a keyed pool
    pub key: String,
}

impl Caller {
    #[must_use]
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            euid: uid,
            privileged: false,
            key: CONSOLE_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn with_euid(mut self, euid: u32) -> Self {
        self.euid = euid;
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }

    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKind {
    Plain,
    Exclusive,
    Owner,
    Gated,
    Keyed,
}

impl fmt::Display for AdmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plain => "plain",
            Self::Exclusive => "exclusive",
            Self::Owner => "owner",
            Self::Gated => "gated",
            Self::Keyed => "keyed",
        };
        f.write_str(name)
    }
}

/// The admission policy behind one device identifier
pub enum Controller {
    Plain(Arc<Device>),
    Exclusive(Exclusive),
    Owner(OwnerGate),
    Gated(Gated),
    Keyed(KeyedPool),
}

impl Controller {
    #[must_use]
    pub fn kind(&self) -> AdmissionKind {
        match self {
            Self::Plain(_) => AdmissionKind::Plain,
            Self::Exclusive(_) => AdmissionKind::Exclusive,
            Self::Owner(_) => AdmissionKind::Owner,
            Self::Gated(_) => AdmissionKind::Gated,
            Self::Keyed(_) => AdmissionKind::Keyed,
        }
    }

    /// Admit `caller` and return the device its session binds to
    ///
    /// Every successful admission must be matched by one
    /// [`Controller::release`] with the same caller.
    ///
    /// # Errors
    ///
    /// - `Busy` from `Exclusive` and `Owner` when the device is held
    /// - `Interrupted` from `Gated` when the wait is cancelled
    /// - `OutOfMemory` from `Keyed` when a new entry cannot be allocated
    pub async fn admit(&self, caller: &Caller, cancel: &CancellationToken) -> Result<Arc<Device>> {
        match self {
            Self::Plain(device) => Ok(Arc::clone(device)),
            Self::Exclusive(exclusive) => exclusive.open(),
            Self::Owner(owner) => owner.open(caller),
            Self::Gated(gated) => gated.open(caller, cancel).await,
            Self::Keyed(pool) => pool.open(caller),
        }
    }

    /// Undo one admission of `caller`
    pub fn release(&self, caller: &Caller) {
        match self {
            Self::Plain(_) | Self::Keyed(_) => {}
            Self::Exclusive(exclusive) => exclusive.release(),
            Self::Owner(owner) => owner.release(caller),
            Self::Gated(gated) => gated.release(caller),
        }
    }

    /// The device behind a non-pooled controller
    #[must_use]
    pub fn device(&self) -> Option<&Arc<Device>> {
        match self {
            Self::Plain(device) => Some(device),
            Self::Exclusive(exclusive) => Some(exclusive.device()),
            Self::Owner(owner) => Some(owner.device()),
            Self::Gated(gated) => Some(gated.device()),
            Self::Keyed(_) => None,
        }
    }

    /// Empty the device, or destroy every device of a pool
    pub async fn teardown(&self) {
        match self {
            Self::Keyed(pool) => pool.teardown().await,
            _ => {
                if let Some(device) = self.device() {
                    device.lock_uninterruptible().await.trim(device.defaults());
                }
            }
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Controller({})", self.kind())
    }
}
