//! Configuration registry clients.
//!
//! A registry holds the object and configuration records of one device
//! type in one domain. Reads go through a cached view that only changes on
//! [`Registry::refresh`]; every write must be followed by a refresh before
//! anything derived from the view (records, name sets) is read again.

mod data;
mod file;
mod memory;

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    ConfigId, ConfigPatch, ConfigRecord, FieldMap, ObjectId, ObjectPatch, ObjectRecord,
};
use crate::naming::pad_identity;

pub use file::{FileBackend, FileRegistry};
pub use memory::{AppliedConfig, MemoryBackend, MemoryRegistry, RegistryOp};

/// Errors returned by registry calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry {device_type}/{domain} is unavailable: {reason}")]
    Unavailable {
        device_type: String,
        domain: String,
        reason: String,
    },

    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    #[error("configuration {0} not found")]
    ConfigNotFound(ConfigId),

    #[error("name '{0}' is already in use")]
    DuplicateName(String),

    #[error("identity '{identity}' already belongs to {holder}")]
    DuplicateIdentity { identity: String, holder: ObjectId },

    #[error("name '{name}' is longer than {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Client for one (device type, domain) registry.
pub trait Registry {
    fn device_type(&self) -> &str;

    fn domain(&self) -> &str;

    /// Width numeric identities are padded to when stored.
    fn identity_width(&self) -> Option<usize>;

    /// Object records as of the last refresh.
    fn objects(&self) -> &BTreeMap<ObjectId, ObjectRecord>;

    /// Configuration records as of the last refresh.
    fn configs(&self) -> &BTreeMap<ConfigId, ConfigRecord>;

    /// The domain's default configuration, which new objects point at and
    /// which is never written.
    fn placeholder(&self) -> ConfigId;

    /// Create an object; it starts out pointing at the placeholder configuration.
    fn create_object(&mut self, patch: &ObjectPatch) -> Result<ObjectId, RegistryError>;

    fn update_object(&mut self, id: ObjectId, patch: &ObjectPatch) -> Result<(), RegistryError>;

    fn create_config(&mut self, name: &str, fields: &FieldMap) -> Result<ConfigId, RegistryError>;

    fn update_config(&mut self, id: ConfigId, patch: &ConfigPatch) -> Result<(), RegistryError>;

    fn link_object_to_config(
        &mut self,
        object: ObjectId,
        config: ConfigId,
    ) -> Result<(), RegistryError>;

    /// Reload the cached view from committed state.
    fn refresh(&mut self) -> Result<(), RegistryError>;

    /// Push the object's linked configuration to the live device at the
    /// object's address.
    fn apply_config_to_device(&mut self, object: ObjectId) -> Result<(), RegistryError>;

    fn object(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.objects().get(&id)
    }

    fn config(&self, id: ConfigId) -> Option<&ConfigRecord> {
        self.configs().get(&id)
    }

    fn object_names(&self) -> BTreeSet<String> {
        self.objects().values().map(|o| o.name.clone()).collect()
    }

    fn config_names(&self) -> BTreeSet<String> {
        self.configs().values().map(|c| c.name.clone()).collect()
    }

    fn config_by_name(&self, name: &str) -> Option<&ConfigRecord> {
        self.configs().values().find(|c| c.name == name)
    }

    /// All stored identities.
    fn identities(&self) -> BTreeSet<String> {
        self.objects()
            .values()
            .filter_map(|o| o.identity.clone())
            .collect()
    }

    /// Canonical form of an identity for this registry.
    fn canonical_identity(&self, raw: &str) -> String {
        pad_identity(raw, self.identity_width())
    }
}

/// Opens registries by device type and domain.
pub trait RegistryOpener {
    type Registry: Registry;

    fn open(&self, device_type: &str, domain: &str) -> Result<Self::Registry, RegistryError>;
}
