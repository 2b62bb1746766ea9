//! Committed registry state and its write rules, shared by every backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RegistryError;
use crate::model::{
    ConfigId, ConfigLink, ConfigPatch, ConfigRecord, FieldMap, ObjectId, ObjectPatch,
    ObjectRecord,
};
use crate::naming::{pad_identity, CONFIG_NAME_MAX};

/// The full contents of one (device type, domain) registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RegistryDocument", into = "RegistryDocument")]
pub(crate) struct RegistryData {
    pub device_type: String,
    pub domain: String,
    pub identity_width: Option<usize>,
    /// The per-domain default configuration new objects point at.
    pub placeholder: ConfigId,
    pub next_id: u64,
    pub objects: BTreeMap<ObjectId, ObjectRecord>,
    pub configs: BTreeMap<ConfigId, ConfigRecord>,
}

/// On-disk shape: records as lists, since JSON map keys must be strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDocument {
    device_type: String,
    domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity_width: Option<usize>,
    placeholder: ConfigId,
    next_id: u64,
    objects: Vec<ObjectRecord>,
    configs: Vec<ConfigRecord>,
}

impl From<RegistryDocument> for RegistryData {
    fn from(doc: RegistryDocument) -> Self {
        Self {
            device_type: doc.device_type,
            domain: doc.domain,
            identity_width: doc.identity_width,
            placeholder: doc.placeholder,
            next_id: doc.next_id,
            objects: doc.objects.into_iter().map(|o| (o.id, o)).collect(),
            configs: doc.configs.into_iter().map(|c| (c.id, c)).collect(),
        }
    }
}

impl From<RegistryData> for RegistryDocument {
    fn from(data: RegistryData) -> Self {
        Self {
            device_type: data.device_type,
            domain: data.domain,
            identity_width: data.identity_width,
            placeholder: data.placeholder,
            next_id: data.next_id,
            objects: data.objects.into_values().collect(),
            configs: data.configs.into_values().collect(),
        }
    }
}

/// What `apply_config_to_device` pushes to a device.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Applicable {
    pub address: String,
    pub config: ConfigId,
    pub fields: FieldMap,
}

impl RegistryData {
    /// A fresh registry holding only the placeholder configuration, named
    /// after the domain.
    pub fn new(device_type: &str, domain: &str, identity_width: Option<usize>) -> Self {
        let placeholder = ConfigId(1);
        let mut configs = BTreeMap::new();
        configs.insert(
            placeholder,
            ConfigRecord {
                id: placeholder,
                name: domain.to_uppercase(),
                device_type: device_type.to_string(),
                fields: FieldMap::new(),
            },
        );
        Self {
            device_type: device_type.to_string(),
            domain: domain.to_string(),
            identity_width,
            placeholder,
            next_id: 2,
            objects: BTreeMap::new(),
            configs,
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn canonical_identity(&self, raw: &str) -> Option<String> {
        Some(pad_identity(raw, self.identity_width)).filter(|s| !s.is_empty())
    }

    fn check_object_name(&self, name: &str, except: Option<ObjectId>) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::Rejected("object name is empty".to_string()));
        }
        if self
            .objects
            .values()
            .any(|o| o.name == name && Some(o.id) != except)
        {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn check_identity(&self, identity: &str, except: Option<ObjectId>) -> Result<(), RegistryError> {
        match self
            .objects
            .values()
            .find(|o| o.identity.as_deref() == Some(identity) && Some(o.id) != except)
        {
            Some(holder) => Err(RegistryError::DuplicateIdentity {
                identity: identity.to_string(),
                holder: holder.id,
            }),
            None => Ok(()),
        }
    }

    fn check_config_name(&self, name: &str, except: Option<ConfigId>) -> Result<(), RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::Rejected(
                "configuration name is empty".to_string(),
            ));
        }
        if name.chars().count() > CONFIG_NAME_MAX {
            return Err(RegistryError::NameTooLong {
                name: name.to_string(),
                max: CONFIG_NAME_MAX,
            });
        }
        if self
            .configs
            .values()
            .any(|c| c.name == name && Some(c.id) != except)
        {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn create_object(
        &mut self,
        patch: &ObjectPatch,
        now: DateTime<Utc>,
    ) -> Result<ObjectId, RegistryError> {
        let name = patch
            .name
            .clone()
            .ok_or_else(|| RegistryError::Rejected("new object needs a name".to_string()))?;
        self.check_object_name(&name, None)?;
        let identity = patch.identity.as_deref().and_then(|i| self.canonical_identity(i));
        if let Some(identity) = &identity {
            self.check_identity(identity, None)?;
        }

        let id = ObjectId(self.alloc_id());
        let mut record = ObjectRecord {
            id,
            name,
            description: String::new(),
            identity: None,
            address: String::new(),
            port: None,
            config: ConfigLink::Placeholder(self.placeholder),
            last_modified: now,
            fields: FieldMap::new(),
        };
        patch.apply_to(&mut record);
        record.identity = identity;
        self.objects.insert(id, record);
        Ok(id)
    }

    pub fn update_object(
        &mut self,
        id: ObjectId,
        patch: &ObjectPatch,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        if !self.objects.contains_key(&id) {
            return Err(RegistryError::ObjectNotFound(id));
        }
        if let Some(name) = &patch.name {
            self.check_object_name(name, Some(id))?;
        }
        let identity = patch.identity.as_deref().map(|i| self.canonical_identity(i));
        if let Some(Some(identity)) = &identity {
            self.check_identity(identity, Some(id))?;
        }

        let record = self
            .objects
            .get_mut(&id)
            .ok_or(RegistryError::ObjectNotFound(id))?;
        patch.apply_to(record);
        if let Some(identity) = identity {
            record.identity = identity;
        }
        record.last_modified = now;
        Ok(())
    }

    pub fn create_config(&mut self, name: &str, fields: &FieldMap) -> Result<ConfigId, RegistryError> {
        self.check_config_name(name, None)?;
        let id = ConfigId(self.alloc_id());
        self.configs.insert(
            id,
            ConfigRecord {
                id,
                name: name.to_string(),
                device_type: self.device_type.clone(),
                fields: fields.clone(),
            },
        );
        Ok(id)
    }

    pub fn update_config(&mut self, id: ConfigId, patch: &ConfigPatch) -> Result<(), RegistryError> {
        if id == self.placeholder {
            return Err(RegistryError::Rejected(format!(
                "{} is the default configuration of {} and is read-only",
                id, self.domain
            )));
        }
        if !self.configs.contains_key(&id) {
            return Err(RegistryError::ConfigNotFound(id));
        }
        if let Some(name) = &patch.name {
            self.check_config_name(name, Some(id))?;
        }
        let record = self
            .configs
            .get_mut(&id)
            .ok_or(RegistryError::ConfigNotFound(id))?;
        if let Some(name) = &patch.name {
            record.name = name.clone();
        }
        for (key, value) in &patch.fields {
            record.fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    pub fn link(
        &mut self,
        object: ObjectId,
        config: ConfigId,
        now: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        if !self.configs.contains_key(&config) {
            return Err(RegistryError::ConfigNotFound(config));
        }
        let placeholder = self.placeholder;
        let record = self
            .objects
            .get_mut(&object)
            .ok_or(RegistryError::ObjectNotFound(object))?;
        record.config = if config == placeholder {
            ConfigLink::Placeholder(config)
        } else {
            ConfigLink::Real(config)
        };
        record.last_modified = now;
        Ok(())
    }

    pub fn applicable(&self, object: ObjectId) -> Result<Applicable, RegistryError> {
        let record = self
            .objects
            .get(&object)
            .ok_or(RegistryError::ObjectNotFound(object))?;
        let config = record.config.real_config().ok_or_else(|| {
            RegistryError::Rejected(format!("{} has no configuration to apply", object))
        })?;
        let fields = self
            .configs
            .get(&config)
            .ok_or(RegistryError::ConfigNotFound(config))?
            .fields
            .clone();
        Ok(Applicable {
            address: record.address.clone(),
            config,
            fields,
        })
    }
}
