//! Merging legacy configuration records into a registry.
//!
//! Records are merged one at a time. A record that fails part way is
//! reported and left as it is; the records before and after it are not
//! affected. Re-running with `update` set repairs such partial records.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::{debug, info, warn};

use fieldsync_core::naming::{
    bounded_name, increment_matching, next_config_name, next_object_name, CONFIG_NAME_MAX,
};
use fieldsync_core::{ConfigPatch, DeviceTypeConfig, FieldMap, ObjectPatch, Registry};

use crate::error::{Result, SyncError};
use crate::linkage::{commit, link_or_reuse, real_config};
use crate::resolver::find_by_identity;

/// Name used for records with neither a description nor an identity.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Prefix of names derived from the identity alone.
pub const IDENTITY_NAME_PREFIX: &str = "SN:";

/// What happened to one legacy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
    Skipped,
}

/// Result of importing one domain.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub domain: String,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
}

impl ImportReport {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    pub fn total(&self) -> usize {
        self.created.len() + self.updated.len() + self.skipped.len() + self.failed.len()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} created, {} updated, {} skipped, {} failed",
            self.domain,
            self.created.len(),
            self.updated.len(),
            self.skipped.len(),
            self.failed.len()
        )?;
        for key in &self.skipped {
            writeln!(f, "  skipped {} (already present)", key)?;
        }
        for (key, err) in &self.failed {
            writeln!(f, "  failed {}: {}", key, err)?;
        }
        Ok(())
    }
}

/// A legacy record split into what goes on the object and on the
/// configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEntry {
    pub name: String,
    pub identity: Option<String>,
    pub object: ObjectPatch,
    pub config: FieldMap,
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

impl LegacyEntry {
    pub fn from_fields(device_type: &DeviceTypeConfig, fields: &FieldMap) -> Self {
        let lookup = |field: &str| {
            fields
                .get(field)
                .map(text)
                .filter(|s| !s.is_empty())
        };
        let description = lookup(device_type.description_field.as_str());
        let identity = device_type
            .identity_field
            .as_deref()
            .filter(|_| !device_type.is_dumb())
            .and_then(lookup);
        let port = device_type.port_field.as_deref().and_then(lookup);

        let name = match (&description, &identity) {
            (Some(description), _) => description.clone(),
            (None, Some(identity)) => format!("{}{}", IDENTITY_NAME_PREFIX, identity),
            _ => UNKNOWN_NAME.to_string(),
        };

        let reserved = |key: &str| {
            key == device_type.description_field
                || device_type.identity_field.as_deref() == Some(key)
                || device_type.port_field.as_deref() == Some(key)
                || device_type.object_fields.iter().any(|f| f == key)
        };
        let config = fields
            .iter()
            .filter(|(key, _)| {
                if device_type.config_fields.is_empty() {
                    !reserved(key.as_str())
                } else {
                    device_type.config_fields.iter().any(|f| f == *key)
                }
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let object_fields = fields
            .iter()
            .filter(|(key, _)| device_type.object_fields.iter().any(|f| f == *key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            name,
            identity: identity.clone(),
            object: ObjectPatch {
                name: None,
                description: description.or(Some(String::new())),
                identity,
                address: None,
                port,
                fields: object_fields,
            },
            config,
        }
    }
}

/// Merge `records` into `registry` under the skip/update policy.
pub fn import_records<R: Registry + ?Sized>(
    registry: &mut R,
    device_type: &DeviceTypeConfig,
    records: &BTreeMap<String, FieldMap>,
    update: bool,
) -> ImportReport {
    let mut report = ImportReport::new(registry.domain());

    for (key, fields) in records {
        let entry = LegacyEntry::from_fields(device_type, fields);
        let result = if device_type.is_dumb() {
            merge_config_only(registry, &entry, update)
        } else {
            merge_identified(registry, &entry, update)
        };
        match result {
            Ok(RecordOutcome::Created) => {
                info!("Imported {} as '{}'", key, entry.name);
                report.created.push(key.clone());
            }
            Ok(RecordOutcome::Updated) => {
                info!("Updated '{}' from {}", entry.name, key);
                report.updated.push(key.clone());
            }
            Ok(RecordOutcome::Skipped) => {
                info!("Skipping {}: '{}' already present", key, entry.name);
                report.skipped.push(key.clone());
            }
            Err(e) => {
                warn!("Failed to import {}: {}", key, e);
                report.failed.push((key.clone(), e));
            }
        }
    }

    report
}

/// Devices without identity are only known by configuration name, as
/// stored: cut to the configuration name bound.
fn merge_config_only<R: Registry + ?Sized>(
    registry: &mut R,
    entry: &LegacyEntry,
    update: bool,
) -> Result<RecordOutcome> {
    let stored = bounded_name(&entry.name, Some(CONFIG_NAME_MAX));
    if let Some(existing) = registry.config_by_name(&stored).map(|c| c.id) {
        if !update {
            return Ok(RecordOutcome::Skipped);
        }
        commit(registry, &format!("update configuration '{}'", stored), |r| {
            r.update_config(existing, &ConfigPatch::fields(entry.config.clone()))
        })?;
        return Ok(RecordOutcome::Updated);
    }

    let name = increment_matching(&entry.name, &registry.config_names(), CONFIG_NAME_MAX)?;
    commit(registry, &format!("create configuration '{}'", name), |r| {
        r.create_config(&name, &entry.config)
    })?;
    Ok(RecordOutcome::Created)
}

fn merge_identified<R: Registry + ?Sized>(
    registry: &mut R,
    entry: &LegacyEntry,
    update: bool,
) -> Result<RecordOutcome> {
    let identity = entry.identity.as_deref().ok_or_else(|| {
        SyncError::PreliminaryCheck(format!("legacy record '{}' has no identity", entry.name))
    })?;

    if let Some(object) = find_by_identity(registry, identity) {
        if !update {
            return Ok(RecordOutcome::Skipped);
        }
        commit(registry, &format!("update {}", object), |r| {
            r.update_object(object, &entry.object)
        })?;
        match real_config(registry, object) {
            Some(config) => {
                let mut names = registry.config_names();
                if let Some(current) = registry.config(config) {
                    names.remove(&current.name);
                }
                let name = increment_matching(&entry.name, &names, CONFIG_NAME_MAX)?;
                debug!("Configuration {} of {} becomes '{}'", config, object, name);
                let patch = ConfigPatch {
                    name: Some(name),
                    fields: entry.config.clone(),
                };
                commit(registry, &format!("update configuration {}", config), |r| {
                    r.update_config(config, &patch)
                })?;
            }
            None => {
                link_or_reuse(registry, object, &entry.config, &entry.name)?;
            }
        }
        return Ok(RecordOutcome::Updated);
    }

    let config_name = next_config_name(registry, &entry.name, None)?;
    let config = commit(registry, &format!("create configuration '{}'", config_name), |r| {
        r.create_config(&config_name, &entry.config)
    })?;
    let object_name = next_object_name(registry, &entry.name, None)?;
    let mut patch = entry.object.clone();
    patch.name = Some(object_name.clone());
    let object = commit(registry, &format!("create object '{}'", object_name), |r| {
        r.create_object(&patch)
    })?;
    commit(registry, &format!("link {} to {}", object, config), |r| {
        r.link_object_to_config(object, config)
    })?;
    Ok(RecordOutcome::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{ConfigLink, MemoryBackend, RegistryOp, RegistryOpener};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn stepper() -> DeviceTypeConfig {
        DeviceTypeConfig {
            config_fields: vec!["VELO".to_string(), "ACCL".to_string()],
            identity_width: Some(3),
            ..DeviceTypeConfig::new("stepper")
        }
    }

    fn record(identity: Option<&str>, desc: &str, velo: f64) -> FieldMap {
        let mut fields = FieldMap::new();
        if let Some(identity) = identity {
            fields.insert("SN".to_string(), json!(identity));
        }
        if !desc.is_empty() {
            fields.insert("DESC".to_string(), json!(desc));
        }
        fields.insert("VELO".to_string(), json!(velo));
        fields.insert("PORT".to_string(), json!(4));
        fields
    }

    #[test]
    fn test_entry_split() {
        let entry = LegacyEntry::from_fields(&stepper(), &record(Some(" 12 "), "", 1.0));
        assert_eq!(entry.name, "SN:12");
        assert_eq!(entry.identity.as_deref(), Some("12"));
        assert_eq!(entry.object.port.as_deref(), Some("4"));
        assert_eq!(entry.config.keys().collect::<Vec<_>>(), vec!["VELO"]);

        let unnamed = LegacyEntry::from_fields(&stepper(), &record(None, "", 1.0));
        assert_eq!(unnamed.name, UNKNOWN_NAME);
    }

    #[test]
    fn test_new_identity_creates_linked_records() {
        let backend = MemoryBackend::new().with_identity_width("stepper", 3);
        let mut reg = backend.open("stepper", "lab").unwrap();
        let mut records = BTreeMap::new();
        records.insert("7".to_string(), record(Some("7"), "slit top", 2.0));

        let report = import_records(&mut reg, &stepper(), &records, false);
        assert_eq!(report.created, vec!["7"]);

        let object = find_by_identity(&reg, "007").unwrap();
        let record = reg.object(object).unwrap();
        assert_eq!(record.name, "slit top");
        let ConfigLink::Real(config) = record.config else {
            panic!("object not linked: {:?}", record.config);
        };
        assert_eq!(reg.config(config).unwrap().fields["VELO"], json!(2.0));
    }

    #[test]
    fn test_update_renames_within_bound() {
        let backend = MemoryBackend::new();
        let mut reg = backend.open("stepper", "lab").unwrap();
        let mut records = BTreeMap::new();
        records.insert("1".to_string(), record(Some("1"), "short", 1.0));
        import_records(&mut reg, &stepper(), &records, false);

        let long = "a description that is much longer than forty two characters";
        records.insert("1".to_string(), record(Some("1"), long, 3.0));
        let report = import_records(&mut reg, &stepper(), &records, true);
        assert_eq!(report.updated, vec!["1"]);

        let object = find_by_identity(&reg, "1").unwrap();
        let config = real_config(&reg, object).unwrap();
        let name = &reg.config(config).unwrap().name;
        assert_eq!(name.chars().count(), CONFIG_NAME_MAX);
        assert!(long.starts_with(name.as_str()));
        assert_eq!(reg.config(config).unwrap().fields["VELO"], json!(3.0));
    }

    #[test]
    fn test_failure_is_isolated_and_repairable() {
        let backend = MemoryBackend::new();
        let mut reg = backend.open("stepper", "lab").unwrap();
        let mut records = BTreeMap::new();
        records.insert("1".to_string(), record(Some("1"), "first", 1.0));
        records.insert("2".to_string(), record(Some("2"), "second", 2.0));

        backend.fail_next(RegistryOp::Link);
        let report = import_records(&mut reg, &stepper(), &records, false);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "1");
        assert_eq!(report.created, vec!["2"]);

        // The object and configuration of the failed record stay behind.
        let partial = find_by_identity(&reg, "1").unwrap();
        assert!(!reg.object(partial).unwrap().config.is_linked_to_real_config());
        assert!(reg.config_by_name("first").is_some());

        let report = import_records(&mut reg, &stepper(), &records, true);
        assert!(report.failed.is_empty());
        assert!(reg.object(partial).unwrap().config.is_linked_to_real_config());
    }

    #[test]
    fn test_dumb_type_is_config_only() {
        let backend = MemoryBackend::new();
        let mut reg = backend.open("slit", "lab").unwrap();
        let dumb = DeviceTypeConfig {
            dumb: true,
            ..DeviceTypeConfig::new("slit")
        };
        let mut records = BTreeMap::new();
        records.insert("a.cfg".to_string(), record(Some("5"), "jaws", 1.0));

        assert_eq!(import_records(&mut reg, &dumb, &records, false).created.len(), 1);
        assert_eq!(import_records(&mut reg, &dumb, &records, false).skipped.len(), 1);

        records.insert("a.cfg".to_string(), record(Some("5"), "jaws", 9.0));
        assert_eq!(import_records(&mut reg, &dumb, &records, true).updated.len(), 1);
        assert_eq!(reg.config_by_name("jaws").unwrap().fields["VELO"], json!(9.0));
        assert!(reg.objects().is_empty());
    }

    #[test]
    fn test_dumb_type_long_name_is_found_again() {
        let backend = MemoryBackend::new();
        let mut reg = backend.open("slit", "lab").unwrap();
        let dumb = DeviceTypeConfig {
            dumb: true,
            ..DeviceTypeConfig::new("slit")
        };
        let long = "a description that is much longer than forty two characters";
        let mut records = BTreeMap::new();
        records.insert("a".to_string(), record(None, long, 1.0));

        assert_eq!(import_records(&mut reg, &dumb, &records, false).created, vec!["a"]);
        let configs = reg.configs().len();
        let again = import_records(&mut reg, &dumb, &records, false);
        assert!(again.created.is_empty());
        assert_eq!(again.skipped, vec!["a"]);
        assert_eq!(reg.configs().len(), configs);

        records.insert("a".to_string(), record(None, long, 6.0));
        assert_eq!(import_records(&mut reg, &dumb, &records, true).updated, vec!["a"]);
        let stored = bounded_name(long, Some(CONFIG_NAME_MAX));
        assert_eq!(reg.config_by_name(&stored).unwrap().fields["VELO"], json!(6.0));
        assert_eq!(reg.configs().len(), configs);
    }

    #[test]
    fn test_identity_name_uses_serial_prefix() {
        let dt = DeviceTypeConfig {
            identity_field: Some("FLD_SN".to_string()),
            ..stepper()
        };
        let mut fields = FieldMap::new();
        fields.insert("FLD_SN".to_string(), json!("12"));
        let entry = LegacyEntry::from_fields(&dt, &fields);
        assert_eq!(entry.name, "SN:12");
    }
}
