//! Error taxonomy for device operations
//!
//! Every failure is returned to the immediate caller. The helpers below map
//! an error to the errno a character device would report, and to the error
//! kinds of `std::io` and `embedded_io`.

use thiserror::Error;

/// Errors returned by the storage engine, the admission controllers and
/// the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScullError {
    /// The device is held by another opener and the policy does not wait
    #[error("device busy")]
    Busy,

    /// A lock wait or an admission wait was cancelled; safe to retry
    #[error("operation interrupted")]
    Interrupted,

    /// A block, slot array, set node or pool entry could not be allocated
    #[error("out of memory")]
    OutOfMemory,

    /// Unknown device identifier
    #[error("no such device: {0}")]
    NotFound(String),

    /// Malformed configuration field, value or seek position
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, ScullError>;

pub const EINTR: i32 = 4;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;

impl ScullError {
    /// The errno a character device reports for this error
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Busy => EBUSY,
            Self::Interrupted => EINTR,
            Self::OutOfMemory => ENOMEM,
            Self::NotFound(_) => ENODEV,
            Self::InvalidArgument(_) => EINVAL,
        }
    }

    /// Whether the whole operation may be retried from scratch
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    #[must_use]
    pub fn io_kind(&self) -> std::io::ErrorKind {
        match self {
            Self::Busy => std::io::ErrorKind::ResourceBusy,
            Self::Interrupted => std::io::ErrorKind::Interrupted,
            Self::OutOfMemory => std::io::ErrorKind::OutOfMemory,
            Self::NotFound(_) => std::io::ErrorKind::NotFound,
            Self::InvalidArgument(_) => std::io::ErrorKind::InvalidInput,
        }
    }
}

impl From<ScullError> for std::io::Error {
    fn from(err: ScullError) -> Self {
        std::io::Error::new(err.io_kind(), err)
    }
}

impl embedded_io_async::Error for ScullError {
    #[allow(clippy::match_same_arms)]
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            // embedded-io has no "busy" kind
            Self::Busy => embedded_io_async::ErrorKind::Other,
            Self::Interrupted => embedded_io_async::ErrorKind::Interrupted,
            Self::OutOfMemory => embedded_io_async::ErrorKind::OutOfMemory,
            Self::NotFound(_) => embedded_io_async::ErrorKind::NotFound,
            Self::InvalidArgument(_) => embedded_io_async::ErrorKind::InvalidInput,
        }
    }
}
