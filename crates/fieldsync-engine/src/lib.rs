//! # fieldsync-engine
//!
//! Synchronization engine between live field devices and configuration
//! registries.
//!
//! This crate provides:
//! - Identity resolution within one registry and across domains
//! - The object/configuration linkage rules used by save and apply
//! - Bulk merge of legacy configuration records
//! - [`SyncEngine`], which runs save, apply, diff, import and identity
//!   change operations and reports per-device outcomes
//! - The [`Prompter`] seam for operator interaction

pub mod engine;
pub mod error;
pub mod import;
pub mod linkage;
pub mod prompt;
pub mod resolver;

pub use engine::{
    ApplyMode, ApplyOptions, ApplyOutcome, BatchReport, DeviceOutcome, IdentityChange,
    IdentityChangeReport, ImportOptions, Plan, SaveOptions, SaveOutcome, SyncEngine,
};
pub use error::{Result, SyncError};
pub use import::{import_records, ImportReport, LegacyEntry};
pub use linkage::Linkage;
pub use prompt::{rank_matches, AlwaysConfirm, Prompter, ScriptedPrompter};
pub use resolver::{find_by_identity, find_freshest_across_registries, Resolved};
