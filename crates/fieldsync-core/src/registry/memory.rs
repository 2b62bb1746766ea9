//! In-memory registry backend.
//!
//! Committed state lives in a shared backend so several handles to the
//! same registry observe each other's writes only after a refresh, the
//! same way handles to a persistent registry do. The backend can also
//! inject one-shot write failures and mark domains unavailable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::data::RegistryData;
use super::{Registry, RegistryError, RegistryOpener};
use crate::model::{
    ConfigId, ConfigPatch, ConfigRecord, FieldMap, ObjectId, ObjectPatch, ObjectRecord,
};

/// Registry calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    CreateObject,
    UpdateObject,
    CreateConfig,
    UpdateConfig,
    Link,
    Apply,
}

/// A configuration pushed to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedConfig {
    pub device_type: String,
    pub domain: String,
    pub object: ObjectId,
    pub address: String,
    pub config: ConfigId,
    pub fields: FieldMap,
}

#[derive(Debug, Default)]
struct BackendState {
    registries: HashMap<(String, String), RegistryData>,
    identity_widths: HashMap<String, usize>,
    unavailable: HashSet<String>,
    failures: Vec<RegistryOp>,
    applied: Vec<AppliedConfig>,
}

/// Shared in-memory storage for any number of registries.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pad numeric identities of `device_type` to `width`.
    pub fn with_identity_width(self, device_type: &str, width: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.identity_widths.insert(device_type.to_string(), width);
        }
        self
    }

    /// Make every later `open` of `domain` fail.
    pub fn set_unavailable(&self, domain: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable.insert(domain.to_string());
        }
    }

    /// Fail the next call of `op`, on any registry.
    pub fn fail_next(&self, op: RegistryOp) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.push(op);
        }
    }

    /// Every configuration pushed to a device so far, oldest first.
    pub fn applied(&self) -> Vec<AppliedConfig> {
        self.state
            .lock()
            .map(|s| s.applied.clone())
            .unwrap_or_default()
    }

    /// Overwrite an object's modification marker.
    pub fn set_last_modified(
        &self,
        device_type: &str,
        domain: &str,
        id: ObjectId,
        at: DateTime<Utc>,
    ) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        state
            .registries
            .get_mut(&(device_type.to_string(), domain.to_string()))
            .and_then(|data| data.objects.get_mut(&id))
            .map(|record| record.last_modified = at)
            .is_some()
    }

    /// Number of committed objects, or 0 for a registry never opened.
    pub fn object_count(&self, device_type: &str, domain: &str) -> usize {
        self.with_data(device_type, domain, |d| d.objects.len())
            .unwrap_or(0)
    }

    /// Number of committed configurations, placeholder included.
    pub fn config_count(&self, device_type: &str, domain: &str) -> usize {
        self.with_data(device_type, domain, |d| d.configs.len())
            .unwrap_or(0)
    }

    fn with_data<T>(
        &self,
        device_type: &str,
        domain: &str,
        f: impl FnOnce(&RegistryData) -> T,
    ) -> Option<T> {
        let state = self.state.lock().ok()?;
        state
            .registries
            .get(&(device_type.to_string(), domain.to_string()))
            .map(f)
    }

    fn lock(&self, device_type: &str, domain: &str) -> Result<MutexGuard<'_, BackendState>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::Unavailable {
            device_type: device_type.to_string(),
            domain: domain.to_string(),
            reason: "backend lock poisoned".to_string(),
        })
    }
}

impl RegistryOpener for MemoryBackend {
    type Registry = MemoryRegistry;

    fn open(&self, device_type: &str, domain: &str) -> Result<MemoryRegistry, RegistryError> {
        let mut state = self.lock(device_type, domain)?;
        if state.unavailable.contains(domain) {
            return Err(RegistryError::Unavailable {
                device_type: device_type.to_string(),
                domain: domain.to_string(),
                reason: "marked unavailable".to_string(),
            });
        }
        let width = state.identity_widths.get(device_type).copied();
        let view = state
            .registries
            .entry((device_type.to_string(), domain.to_string()))
            .or_insert_with(|| RegistryData::new(device_type, domain, width))
            .clone();

        Ok(MemoryRegistry {
            backend: self.clone(),
            view,
        })
    }
}

/// Handle to one registry in a [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    backend: MemoryBackend,
    view: RegistryData,
}

impl MemoryRegistry {
    fn write<T>(
        &self,
        op: Option<RegistryOp>,
        f: impl FnOnce(&mut RegistryData, &mut Vec<AppliedConfig>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut state = self.backend.lock(&self.view.device_type, &self.view.domain)?;
        if let Some(op) = op {
            if let Some(pos) = state.failures.iter().position(|f| *f == op) {
                state.failures.remove(pos);
                return Err(RegistryError::Storage(format!("{:?} failed", op)));
            }
        }
        let BackendState {
            registries, applied, ..
        } = &mut *state;
        let data = registries
            .get_mut(&(self.view.device_type.clone(), self.view.domain.clone()))
            .ok_or_else(|| RegistryError::Unavailable {
                device_type: self.view.device_type.clone(),
                domain: self.view.domain.clone(),
                reason: "registry disappeared".to_string(),
            })?;
        f(data, applied)
    }
}

impl Registry for MemoryRegistry {
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
        self.write(Some(RegistryOp::CreateObject), |data, _| {
            data.create_object(patch, Utc::now())
        })
    }

    fn update_object(&mut self, id: ObjectId, patch: &ObjectPatch) -> Result<(), RegistryError> {
        self.write(Some(RegistryOp::UpdateObject), |data, _| {
            data.update_object(id, patch, Utc::now())
        })
    }

    fn create_config(&mut self, name: &str, fields: &FieldMap) -> Result<ConfigId, RegistryError> {
        self.write(Some(RegistryOp::CreateConfig), |data, _| {
            data.create_config(name, fields)
        })
    }

    fn update_config(&mut self, id: ConfigId, patch: &ConfigPatch) -> Result<(), RegistryError> {
        self.write(Some(RegistryOp::UpdateConfig), |data, _| {
            data.update_config(id, patch)
        })
    }

    fn link_object_to_config(
        &mut self,
        object: ObjectId,
        config: ConfigId,
    ) -> Result<(), RegistryError> {
        self.write(Some(RegistryOp::Link), |data, _| {
            data.link(object, config, Utc::now())
        })
    }

    fn refresh(&mut self) -> Result<(), RegistryError> {
        let fresh = self.write(None, |data, _| Ok(data.clone()))?;
        self.view = fresh;
        Ok(())
    }

    fn apply_config_to_device(&mut self, object: ObjectId) -> Result<(), RegistryError> {
        self.write(Some(RegistryOp::Apply), |data, applied| {
            let applicable = data.applicable(object)?;
            applied.push(AppliedConfig {
                device_type: data.device_type.clone(),
                domain: data.domain.clone(),
                object,
                address: applicable.address,
                config: applicable.config,
                fields: applicable.fields,
            });
            Ok(())
        })
    }
}
