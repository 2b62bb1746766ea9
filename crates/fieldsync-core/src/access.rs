//! Live device access and legacy record sources.
//!
//! Both are external collaborators: the engine only reads through these
//! traits. Writing live values goes through
//! [`Registry::apply_config_to_device`](crate::registry::Registry::apply_config_to_device).

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::config::DeviceTypeConfig;
use crate::model::{FieldMap, LiveSnapshot};
use crate::naming::pad_identity;

/// Errors from live devices and legacy sources.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("device '{identifier}' is not reachable: {reason}")]
    Unreachable { identifier: String, reason: String },

    #[error("field '{field}' is not readable on '{identifier}'")]
    MissingField { identifier: String, field: String },

    #[error("legacy records at '{location}' are unavailable: {reason}")]
    LegacyUnavailable { location: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read access to live device fields.
pub trait LiveAccess {
    /// Read one field of the device at `identifier`.
    fn read_field(&self, identifier: &str, field: &str) -> Result<Value, AccessError>;
}

/// A source of legacy configuration records.
pub trait LegacySource {
    /// List legacy records for `domain`, keyed by identity or, for records
    /// without one, by a source-specific key. `path` overrides the
    /// source's default location.
    fn list_legacy_records(
        &self,
        domain: &str,
        path: Option<&Path>,
    ) -> Result<BTreeMap<String, FieldMap>, AccessError>;
}

fn read_optional<A: LiveAccess + ?Sized>(
    access: &A,
    identifier: &str,
    field: &str,
) -> Result<Option<Value>, AccessError> {
    match access.read_field(identifier, field) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(AccessError::MissingField { .. }) => {
            debug!("{} has no field {}", identifier, field);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Read a full live snapshot of the device at `identifier`.
///
/// Fields the device does not expose are left out; an unreachable device
/// is an error.
pub fn read_snapshot<A: LiveAccess + ?Sized>(
    access: &A,
    identifier: &str,
    device_type: &DeviceTypeConfig,
) -> Result<LiveSnapshot, AccessError> {
    let identity = match &device_type.identity_field {
        Some(field) => read_optional(access, identifier, field)?
            .map(|v| pad_identity(&value_to_string(&v), device_type.identity_width))
            .filter(|s| !s.is_empty()),
        None => None,
    };
    let description = read_optional(access, identifier, &device_type.description_field)?
        .map(|v| value_to_string(&v))
        .unwrap_or_default();
    let port = match &device_type.port_field {
        Some(field) => read_optional(access, identifier, field)?.map(|v| value_to_string(&v)),
        None => None,
    };

    let mut object_fields = FieldMap::new();
    for field in &device_type.object_fields {
        if let Some(value) = read_optional(access, identifier, field)? {
            object_fields.insert(field.clone(), value);
        }
    }
    let mut config_fields = FieldMap::new();
    for field in &device_type.config_fields {
        if let Some(value) = read_optional(access, identifier, field)? {
            config_fields.insert(field.clone(), value);
        }
    }

    Ok(LiveSnapshot {
        identifier: identifier.to_string(),
        identity,
        description,
        port,
        object_fields,
        config_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeDevices(HashMap<String, FieldMap>);

    impl LiveAccess for FakeDevices {
        fn read_field(&self, identifier: &str, field: &str) -> Result<Value, AccessError> {
            let device = self.0.get(identifier).ok_or_else(|| AccessError::Unreachable {
                identifier: identifier.to_string(),
                reason: "no such device".to_string(),
            })?;
            device
                .get(field)
                .cloned()
                .ok_or_else(|| AccessError::MissingField {
                    identifier: identifier.to_string(),
                    field: field.to_string(),
                })
        }
    }

    fn device_type() -> DeviceTypeConfig {
        DeviceTypeConfig {
            identity_width: Some(5),
            config_fields: vec!["VELO".to_string(), "ACCL".to_string()],
            object_fields: vec!["EE".to_string()],
            ..DeviceTypeConfig::new("stepper")
        }
    }

    #[test]
    fn test_read_snapshot() {
        let mut fields = FieldMap::new();
        fields.insert("SN".to_string(), json!(42));
        fields.insert("DESC".to_string(), json!("slit top "));
        fields.insert("PORT".to_string(), json!("3"));
        fields.insert("VELO".to_string(), json!(1.25));
        let devices = FakeDevices(HashMap::from([("LAB:M:01".to_string(), fields)]));

        let snap = read_snapshot(&devices, "LAB:M:01", &device_type()).unwrap();
        assert_eq!(snap.identity.as_deref(), Some("00042"));
        assert_eq!(snap.description, "slit top");
        assert_eq!(snap.port.as_deref(), Some("3"));
        assert_eq!(snap.config_fields.len(), 1);
        assert!(snap.object_fields.is_empty());
    }

    #[test]
    fn test_unreachable_device() {
        let devices = FakeDevices(HashMap::new());
        let err = read_snapshot(&devices, "LAB:M:01", &device_type()).unwrap_err();
        assert!(matches!(err, AccessError::Unreachable { .. }));
    }

    #[test]
    fn test_blank_identity_is_dumb() {
        let mut fields = FieldMap::new();
        fields.insert("SN".to_string(), json!(""));
        let devices = FakeDevices(HashMap::from([("LAB:M:02".to_string(), fields)]));
        let snapshot = read_snapshot(&devices, "LAB:M:02", &device_type()).unwrap();
        assert_eq!(snapshot.identity, None);
        assert!(snapshot.is_dumb());
    }
}
