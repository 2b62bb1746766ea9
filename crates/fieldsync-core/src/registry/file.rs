//! JSON-file registry backend.
//!
//! Each (device type, domain) registry is one JSON document at
//! `<root>/<device type>/<domain>.json`. Writes read the current document,
//! apply the change and replace the file, so they are committed
//! immediately; the handle's view only changes on refresh.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use super::data::RegistryData;
use super::{Registry, RegistryError, RegistryOpener};
use crate::config::SyncConfig;
use crate::live::LiveDirectory;
use crate::model::{
    ConfigId, ConfigPatch, ConfigRecord, FieldMap, ObjectId, ObjectPatch, ObjectRecord,
};

/// Opens file registries below a root directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    live: Option<LiveDirectory>,
    identity_widths: HashMap<String, usize>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            live: None,
            identity_widths: HashMap::new(),
        }
    }

    /// Backend for the registry and live roots of a configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        let mut backend = Self::new(&config.registry_root);
        if let Some(live_root) = &config.live_root {
            backend = backend.with_live(LiveDirectory::new(live_root));
        }
        for device_type in &config.device_types {
            if let Some(width) = device_type.identity_width {
                backend = backend.with_identity_width(&device_type.name, width);
            }
        }
        backend
    }

    /// Push applied configurations into `live`.
    pub fn with_live(mut self, live: LiveDirectory) -> Self {
        self.live = Some(live);
        self
    }

    pub fn with_identity_width(mut self, device_type: &str, width: usize) -> Self {
        self.identity_widths.insert(device_type.to_string(), width);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RegistryOpener for FileBackend {
    type Registry = FileRegistry;

    fn open(&self, device_type: &str, domain: &str) -> Result<FileRegistry, RegistryError> {
        let path = self.root.join(device_type).join(format!("{}.json", domain));
        let width = self.identity_widths.get(device_type).copied();
        let unavailable = |reason: String| RegistryError::Unavailable {
            device_type: device_type.to_string(),
            domain: domain.to_string(),
            reason,
        };

        if !path.exists() {
            debug!("Creating registry {}", path.display());
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| unavailable(format!("{}: {}", parent.display(), e)))?;
            }
            store(&path, &RegistryData::new(device_type, domain, width))?;
        }

        let mut registry = FileRegistry {
            path,
            live: self.live.clone(),
            identity_width: width,
            view: RegistryData::new(device_type, domain, width),
        };
        registry
            .refresh()
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(registry)
    }
}

fn load(path: &Path) -> Result<RegistryData, RegistryError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| RegistryError::Storage(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&json)
        .map_err(|e| RegistryError::Storage(format!("{}: {}", path.display(), e)))
}

fn store(path: &Path, data: &RegistryData) -> Result<(), RegistryError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| RegistryError::Storage(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| RegistryError::Storage(format!("{}: {}", path.display(), e)))
}

/// Handle to one JSON-file registry.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
    live: Option<LiveDirectory>,
    identity_width: Option<usize>,
    view: RegistryData,
}

impl FileRegistry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_current(&self) -> Result<RegistryData, RegistryError> {
        let mut data = load(&self.path)?;
        if self.identity_width.is_some() {
            data.identity_width = self.identity_width;
        }
        Ok(data)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut RegistryData) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut data = self.load_current()?;
        let out = f(&mut data)?;
        store(&self.path, &data)?;
        Ok(out)
    }
}

impl Registry for FileRegistry {
    fn device_type(&self) -> &str {
        &self.view.device_type
    }

    fn domain(&self) -> &str {
        &self.view.domain
    }

    fn identity_width(&self) -> Option<usize> {
        self.view.identity_width
    }

    fn objects(&self) -> &BTreeMap<ObjectId, ObjectRecord> {
        &self.view.objects
    }

    fn configs(&self) -> &BTreeMap<ConfigId, ConfigRecord> {
        &self.view.configs
    }

    fn placeholder(&self) -> ConfigId {
        self.view.placeholder
    }

    fn create_object(&mut self, patch: &ObjectPatch) -> Result<ObjectId, RegistryError> {
        self.write(|data| data.create_object(patch, Utc::now()))
    }

    fn update_object(&mut self, id: ObjectId, patch: &ObjectPatch) -> Result<(), RegistryError> {
        self.write(|data| data.update_object(id, patch, Utc::now()))
    }

    fn create_config(&mut self, name: &str, fields: &FieldMap) -> Result<ConfigId, RegistryError> {
        self.write(|data| data.create_config(name, fields))
    }

    fn update_config(&mut self, id: ConfigId, patch: &ConfigPatch) -> Result<(), RegistryError> {
        self.write(|data| data.update_config(id, patch))
    }

    fn link_object_to_config(
        &mut self,
        object: ObjectId,
        config: ConfigId,
    ) -> Result<(), RegistryError> {
        self.write(|data| data.link(object, config, Utc::now()))
    }

    fn refresh(&mut self) -> Result<(), RegistryError> {
        self.view = self.load_current()?;
        Ok(())
    }

    fn apply_config_to_device(&mut self, object: ObjectId) -> Result<(), RegistryError> {
        let live = self.live.as_ref().ok_or_else(|| {
            RegistryError::Rejected("no live directory configured for apply".to_string())
        })?;
        let applicable = self.load_current()?.applicable(object)?;
        live.merge(&applicable.address, &applicable.fields)
            .map_err(|e| RegistryError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::LiveAccess;
    use serde_json::json;

    #[test]
    fn test_open_creates_document() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path());
        let reg = backend.open("stepper", "lab").unwrap();

        assert!(dir.path().join("stepper").join("lab.json").exists());
        assert_eq!(reg.config_names().into_iter().collect::<Vec<_>>(), vec!["LAB"]);
    }

    #[test]
    fn test_writes_persist_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).with_identity_width("stepper", 5);
        let mut reg = backend.open("stepper", "lab").unwrap();

        let obj = reg
            .create_object(&ObjectPatch {
                name: Some("m1".to_string()),
                identity: Some("12".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(reg.object(obj).is_none());
        reg.refresh().unwrap();
        assert_eq!(reg.object(obj).unwrap().identity.as_deref(), Some("00012"));

        let other = backend.open("stepper", "lab").unwrap();
        assert_eq!(other.identities().into_iter().collect::<Vec<_>>(), vec!["00012"]);
    }

    #[test]
    fn test_apply_writes_live_fields() {
        let dir = tempfile::tempdir().unwrap();
        let live = LiveDirectory::new(dir.path().join("live"));
        let backend = FileBackend::new(dir.path().join("registry")).with_live(live.clone());
        let mut reg = backend.open("stepper", "lab").unwrap();

        let obj = reg
            .create_object(&ObjectPatch {
                name: Some("m1".to_string()),
                address: Some("LAB:EXP:MMS:03".to_string()),
                ..Default::default()
            })
            .unwrap();
        let mut fields = FieldMap::new();
        fields.insert("VELO".to_string(), json!(4));
        let cfg = reg.create_config("m1", &fields).unwrap();
        reg.link_object_to_config(obj, cfg).unwrap();
        reg.apply_config_to_device(obj).unwrap();

        assert_eq!(live.read_field("LAB:EXP:MMS:03", "VELO").unwrap(), json!(4));
    }

    #[test]
    fn test_apply_without_live_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = FileBackend::new(dir.path()).open("stepper", "lab").unwrap();
        assert!(matches!(
            reg.apply_config_to_device(ObjectId(9)),
            Err(RegistryError::Rejected(_))
        ));
    }
}
