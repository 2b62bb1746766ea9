//! Registry data model types.
//!
//! These types represent the records a configuration registry keeps for
//! field devices:
//! - Object records, one per physical device slot
//! - Configuration records, named and shareable between objects
//! - Live snapshots read from devices, never persisted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Field name → value mapping shared by objects, configurations and snapshots.
pub type FieldMap = BTreeMap<String, Value>;

/// Object field names used when an object record is flattened for diffing.
pub const NAME_FIELD: &str = "name";
pub const DESCRIPTION_FIELD: &str = "description";
pub const IDENTITY_FIELD: &str = "identity";
pub const ADDRESS_FIELD: &str = "address";
pub const PORT_FIELD: &str = "port";

/// Registry-assigned object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// Registry-assigned configuration id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(pub u64);

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cfg#{}", self.0)
    }
}

/// How an object refers to its configuration.
///
/// `Placeholder` is the registry's per-domain default configuration. It marks
/// an object that has never been linked to a real configuration and must never
/// be written to on the object's behalf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "config", rename_all = "camelCase")]
pub enum ConfigLink {
    #[default]
    Unlinked,
    Placeholder(ConfigId),
    Real(ConfigId),
}

impl ConfigLink {
    /// The linked configuration id, placeholder included.
    pub fn config_id(&self) -> Option<ConfigId> {
        match self {
            ConfigLink::Unlinked => None,
            ConfigLink::Placeholder(id) | ConfigLink::Real(id) => Some(*id),
        }
    }

    /// The linked configuration id, only when it is a real configuration.
    pub fn real_config(&self) -> Option<ConfigId> {
        match self {
            ConfigLink::Real(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_linked_to_real_config(&self) -> bool {
        matches!(self, ConfigLink::Real(_))
    }
}

/// One physical device slot known to a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Durable identity (serial number). `None` for dumb devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Live address (base identifier) the device was last seen at.
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default)]
    pub config: ConfigLink,
    pub last_modified: DateTime<Utc>,
    /// Additional object-level fields for the device type.
    #[serde(default)]
    pub fields: FieldMap,
}

impl ObjectRecord {
    /// Flatten the record into a field map for diffing.
    pub fn field_view(&self) -> FieldMap {
        let mut view = self.fields.clone();
        view.insert(NAME_FIELD.to_string(), Value::from(self.name.clone()));
        view.insert(
            DESCRIPTION_FIELD.to_string(),
            Value::from(self.description.clone()),
        );
        if let Some(identity) = &self.identity {
            view.insert(IDENTITY_FIELD.to_string(), Value::from(identity.clone()));
        }
        view.insert(ADDRESS_FIELD.to_string(), Value::from(self.address.clone()));
        if let Some(port) = &self.port {
            view.insert(PORT_FIELD.to_string(), Value::from(port.clone()));
        }
        view
    }
}

/// A named, reusable bundle of field values for a device type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub id: ConfigId,
    pub name: String,
    pub device_type: String,
    #[serde(default)]
    pub fields: FieldMap,
}

/// Changes to an object record. `None` leaves an attribute untouched;
/// `fields` are merged into the existing field map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub identity: Option<String>,
    pub address: Option<String>,
    pub port: Option<String>,
    pub fields: FieldMap,
}

impl ObjectPatch {
    /// Patch that only changes the durable identity.
    pub fn identity(identity: &str) -> Self {
        Self {
            identity: Some(identity.to_string()),
            ..Default::default()
        }
    }

    /// Patch that only moves the object to a new address and port.
    pub fn location(address: &str, port: Option<String>) -> Self {
        Self {
            address: Some(address.to_string()),
            port,
            ..Default::default()
        }
    }

    /// Patch that renames the object and its description.
    pub fn rename(name: &str, description: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            description: Some(description.to_string()),
            ..Default::default()
        }
    }

    /// Merge the patch into a record. Identity is stored as given; callers
    /// canonicalize it first.
    pub fn apply_to(&self, record: &mut ObjectRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(description) = &self.description {
            record.description = description.clone();
        }
        if let Some(identity) = &self.identity {
            record.identity = Some(identity.clone());
        }
        if let Some(address) = &self.address {
            record.address = address.clone();
        }
        if let Some(port) = &self.port {
            record.port = Some(port.clone());
        }
        for (key, value) in &self.fields {
            record.fields.insert(key.clone(), value.clone());
        }
    }
}

/// Changes to a configuration record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub name: Option<String>,
    pub fields: FieldMap,
}

impl ConfigPatch {
    pub fn fields(fields: FieldMap) -> Self {
        Self { name: None, fields }
    }
}

/// A transient read of a device's current state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    /// Fully-qualified identifier the device was read at.
    pub identifier: String,
    /// Durable identity, canonicalized. `None` for dumb devices.
    pub identity: Option<String>,
    pub description: String,
    pub port: Option<String>,
    pub object_fields: FieldMap,
    pub config_fields: FieldMap,
}

impl LiveSnapshot {
    /// A device without a durable identity is identified by configuration name.
    pub fn is_dumb(&self) -> bool {
        self.identity.as_deref().map_or(true, |s| s.trim().is_empty())
    }

    /// Object patch carrying everything the live device reports.
    pub fn object_patch(&self) -> ObjectPatch {
        ObjectPatch {
            name: None,
            description: Some(self.description.clone()),
            identity: self.identity.clone(),
            address: Some(self.identifier.clone()),
            port: self.port.clone(),
            fields: self.object_fields.clone(),
        }
    }

    /// Flatten the object half of the snapshot with the same keys as
    /// [`ObjectRecord::field_view`], minus the registry-only name.
    pub fn object_view(&self) -> FieldMap {
        let mut view = self.object_fields.clone();
        view.insert(
            DESCRIPTION_FIELD.to_string(),
            Value::from(self.description.clone()),
        );
        if let Some(identity) = &self.identity {
            view.insert(IDENTITY_FIELD.to_string(), Value::from(identity.clone()));
        }
        view.insert(
            ADDRESS_FIELD.to_string(),
            Value::from(self.identifier.clone()),
        );
        if let Some(port) = &self.port {
            view.insert(PORT_FIELD.to_string(), Value::from(port.clone()));
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ObjectRecord {
        ObjectRecord {
            id: ObjectId(3),
            name: "stage x".to_string(),
            description: "stage x".to_string(),
            identity: Some("00123".to_string()),
            address: "LAB:EXP:MMS:01".to_string(),
            port: Some("4".to_string()),
            config: ConfigLink::Placeholder(ConfigId(1)),
            last_modified: Utc::now(),
            fields: FieldMap::new(),
        }
    }

    #[test]
    fn test_config_link_states() {
        assert_eq!(ConfigLink::Unlinked.config_id(), None);
        assert_eq!(ConfigLink::Placeholder(ConfigId(1)).config_id(), Some(ConfigId(1)));
        assert_eq!(ConfigLink::Placeholder(ConfigId(1)).real_config(), None);
        assert!(!ConfigLink::Placeholder(ConfigId(1)).is_linked_to_real_config());
        assert!(ConfigLink::Real(ConfigId(2)).is_linked_to_real_config());
    }

    #[test]
    fn test_patch_merges_fields() {
        let mut rec = record();
        rec.fields.insert("VELO".to_string(), serde_json::json!(1.0));

        let mut patch = ObjectPatch::location("LAB:EXP:MMS:07", Some("9".to_string()));
        patch.fields.insert("ACCL".to_string(), serde_json::json!(0.2));
        patch.apply_to(&mut rec);

        assert_eq!(rec.address, "LAB:EXP:MMS:07");
        assert_eq!(rec.port.as_deref(), Some("9"));
        assert_eq!(rec.fields["VELO"], serde_json::json!(1.0));
        assert_eq!(rec.fields["ACCL"], serde_json::json!(0.2));
        assert_eq!(rec.name, "stage x");
    }

    #[test]
    fn test_dumb_snapshot() {
        let mut snap = LiveSnapshot::default();
        assert!(snap.is_dumb());
        snap.identity = Some("  ".to_string());
        assert!(snap.is_dumb());
        snap.identity = Some("001".to_string());
        assert!(!snap.is_dumb());
    }

    #[test]
    fn test_link_serialization() {
        let json = serde_json::to_value(ConfigLink::Real(ConfigId(7))).unwrap();
        assert_eq!(json, serde_json::json!({"state": "real", "config": 7}));
        let back: ConfigLink = serde_json::from_value(json).unwrap();
        assert_eq!(back, ConfigLink::Real(ConfigId(7)));
    }
}
