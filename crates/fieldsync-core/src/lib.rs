//! # fieldsync-core
//!
//! Core data model and registry clients for field device synchronization.
//!
//! This crate provides:
//! - Data model types (ObjectRecord, ConfigRecord, LiveSnapshot, etc.)
//! - Identifier expansion for batches of device identifiers
//! - Collision-free naming and identity canonicalization
//! - Field-level diffing between snapshots
//! - The registry client trait with in-memory and JSON-file backends
//! - Live device access and legacy source traits
//! - Tool configuration
//!
//! This crate contains no async code and performs no terminal interaction.

pub mod access;
pub mod config;
pub mod diff;
pub mod identifier;
pub mod live;
pub mod model;
pub mod naming;
pub mod registry;

pub use access::{AccessError, LegacySource, LiveAccess};
pub use config::{ConfigError, DeviceTypeConfig, SyncConfig};
pub use diff::{DiffEntry, DiffKind, DiffMode, DiffReport, DiffScope, Snapshot};
pub use live::LiveDirectory;
pub use model::*;
pub use registry::{
    AppliedConfig, FileBackend, FileRegistry, MemoryBackend, MemoryRegistry, Registry,
    RegistryError, RegistryOp, RegistryOpener,
};
