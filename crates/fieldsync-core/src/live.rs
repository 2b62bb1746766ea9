//! Live device fields mirrored on disk.
//!
//! Each device is one JSON object of field values stored as
//! `<root>/<identifier>.json`, with `:` in the identifier replaced by `_`.
//! This backs the live access layer when devices are simulated, and is
//! where the file registry pushes applied configurations.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::access::{AccessError, LiveAccess};
use crate::model::FieldMap;

#[derive(Debug, Clone)]
pub struct LiveDirectory {
    root: PathBuf,
}

impl LiveDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_path(&self, identifier: &str) -> PathBuf {
        let file: String = identifier
            .chars()
            .map(|c| if c == ':' || c == '/' { '_' } else { c })
            .collect();
        self.root.join(format!("{}.json", file))
    }

    /// All fields of a device.
    pub fn load(&self, identifier: &str) -> Result<FieldMap, AccessError> {
        let path = self.device_path(identifier);
        let json = std::fs::read_to_string(&path).map_err(|e| AccessError::Unreachable {
            identifier: identifier.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write `fields` over the device's current values, creating the
    /// device file if needed.
    pub fn merge(&self, identifier: &str, fields: &FieldMap) -> Result<(), AccessError> {
        let path = self.device_path(identifier);
        let mut current = if path.exists() {
            self.load(identifier)?
        } else {
            FieldMap::new()
        };
        for (key, value) in fields {
            current.insert(key.clone(), value.clone());
        }
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(&path, serde_json::to_string_pretty(&current)?)?;
        Ok(())
    }
}

impl LiveAccess for LiveDirectory {
    fn read_field(&self, identifier: &str, field: &str) -> Result<Value, AccessError> {
        self.load(identifier)?
            .remove(field)
            .ok_or_else(|| AccessError::MissingField {
                identifier: identifier.to_string(),
                field: field.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let live = LiveDirectory::new(dir.path());

        let mut fields = FieldMap::new();
        fields.insert("SN".to_string(), json!("00000042"));
        fields.insert("VELO".to_string(), json!(1.5));
        live.merge("LAB:EXP:MMS:01", &fields).unwrap();

        let mut update = FieldMap::new();
        update.insert("VELO".to_string(), json!(2.0));
        live.merge("LAB:EXP:MMS:01", &update).unwrap();

        assert!(dir.path().join("LAB_EXP_MMS_01.json").exists());
        assert_eq!(live.read_field("LAB:EXP:MMS:01", "VELO").unwrap(), json!(2.0));
        assert_eq!(live.read_field("LAB:EXP:MMS:01", "SN").unwrap(), json!("00000042"));
        assert!(matches!(
            live.read_field("LAB:EXP:MMS:01", "ACCL"),
            Err(AccessError::MissingField { .. })
        ));
    }

    #[test]
    fn test_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let live = LiveDirectory::new(dir.path());
        assert!(matches!(
            live.read_field("LAB:EXP:MMS:09", "SN"),
            Err(AccessError::Unreachable { .. })
        ));
    }
}
