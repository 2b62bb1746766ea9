//! Shared fixtures for engine integration tests.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use fieldsync_core::{
    AccessError, DeviceTypeConfig, FieldMap, LegacySource, LiveAccess, MemoryBackend, SyncConfig,
};
use fieldsync_engine::{Prompter, SyncEngine};

/// Live devices held in memory. Clones share the same devices.
#[derive(Debug, Clone, Default)]
pub struct Devices {
    devices: Arc<Mutex<HashMap<String, FieldMap>>>,
}

impl Devices {
    pub fn set(&self, identifier: &str, fields: FieldMap) {
        self.devices
            .lock()
            .unwrap()
            .insert(identifier.to_string(), fields);
    }

    pub fn set_field(&self, identifier: &str, field: &str, value: Value) {
        self.devices
            .lock()
            .unwrap()
            .entry(identifier.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn unplug(&self, identifier: &str) {
        self.devices.lock().unwrap().remove(identifier);
    }
}

impl LiveAccess for Devices {
    fn read_field(&self, identifier: &str, field: &str) -> Result<Value, AccessError> {
        let devices = self.devices.lock().unwrap();
        let device = devices
            .get(identifier)
            .ok_or_else(|| AccessError::Unreachable {
                identifier: identifier.to_string(),
                reason: "not connected".to_string(),
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

/// Legacy records per domain.
#[derive(Debug, Clone, Default)]
pub struct LegacyRecords(pub BTreeMap<String, BTreeMap<String, FieldMap>>);

impl LegacyRecords {
    pub fn add(&mut self, domain: &str, key: &str, fields: FieldMap) {
        self.0
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), fields);
    }
}

impl LegacySource for LegacyRecords {
    fn list_legacy_records(
        &self,
        domain: &str,
        _path: Option<&Path>,
    ) -> Result<BTreeMap<String, FieldMap>, AccessError> {
        self.0
            .get(domain)
            .cloned()
            .ok_or_else(|| AccessError::LegacyUnavailable {
                location: domain.to_string(),
                reason: "no records".to_string(),
            })
    }
}

pub fn config() -> SyncConfig {
    let stepper = DeviceTypeConfig {
        config_fields: vec!["VELO".to_string(), "ACCL".to_string()],
        identity_width: Some(3),
        ..DeviceTypeConfig::new("stepper")
    };
    let slit = DeviceTypeConfig {
        identity_field: None,
        config_fields: vec!["VELO".to_string()],
        ..DeviceTypeConfig::new("slit")
    };
    SyncConfig {
        domains: vec!["lab".to_string(), "field".to_string()],
        default_device_type: "stepper".to_string(),
        device_types: vec![stepper, slit],
        ..SyncConfig::default()
    }
}

pub fn stepper(config: &SyncConfig) -> DeviceTypeConfig {
    config.device_type("stepper").unwrap().clone()
}

pub fn backend() -> MemoryBackend {
    MemoryBackend::new().with_identity_width("stepper", 3)
}

/// Fields of a smart stepper device.
pub fn motor(sn: &str, desc: &str, velo: f64) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("SN".to_string(), json!(sn));
    fields.insert("DESC".to_string(), json!(desc));
    fields.insert("PORT".to_string(), json!("4"));
    fields.insert("VELO".to_string(), json!(velo));
    fields.insert("ACCL".to_string(), json!(0.5));
    fields
}

pub fn engine<P: Prompter>(
    backend: &MemoryBackend,
    devices: &Devices,
    prompter: P,
) -> SyncEngine<MemoryBackend, Devices, P> {
    SyncEngine::new(config(), backend.clone(), devices.clone(), prompter)
}

pub fn domains(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
