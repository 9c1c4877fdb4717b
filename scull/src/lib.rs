//! Sparse in-memory byte devices with admission control
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Registry  (device name → Controller)       │
//! └─────────────────────────────────────────────┘
//!          │ open(name, request) → Session
//!          ▼
//! ┌─────────────────────────────────────────────┐
//! │  Controller (Plain / Exclusive / Owner /    │
//! │              Gated / Keyed)                 │
//! │  - decides who may open, waits if needed    │
//! └─────────────────────────────────────────────┘
//!          │ binds session to
//!          ▼
//! ┌─────────────────────────────────────────────┐
//! │  Device                                     │
//! │  - cancellable lock around a QuantumStore   │
//! └─────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────┐
//! │  QuantumStore (chain of sets of blocks)     │
//! │  - lazily allocated from the BlockArena     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod access;
pub mod arena;
pub mod config;
pub mod device;
pub mod error;
pub mod idgen;
pub mod qset;
pub mod registry;
pub mod session;
pub mod wait_queue;


// Re-export the session-level API for convenience
pub use access::{AccessMode, AdmissionKind, Caller, Controller};
pub use config::{ConfigField, Geometry, ScullConfig};
pub use device::Device;
pub use error::{Result, ScullError};
pub use registry::Registry;
pub use session::{OpenRequest, Session};

// Re-export storage types
pub use arena::BlockArena;
pub use qset::QuantumStore;
