//! Directory of legacy files, one device per file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use fieldsync_core::{AccessError, DeviceTypeConfig, FieldMap, LegacySource, SyncConfig};

use crate::error::LegacyError;
use crate::parser::parse_record;

fn record_key(fields: &FieldMap, identity_field: Option<&str>) -> Option<String> {
    let value = fields.get(identity_field?)?;
    let key = match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!key.is_empty()).then_some(key)
}

/// Read every legacy file in `dir`.
///
/// Records are keyed by their identity field when they have one, else by
/// file stem. Hidden files are ignored. A file that cannot be parsed, or
/// whose key was already taken by an earlier file, is logged and left
/// out.
pub fn read_directory(
    dir: &Path,
    identity_field: Option<&str>,
) -> Result<BTreeMap<String, FieldMap>, LegacyError> {
    if !dir.is_dir() {
        return Err(LegacyError::MissingDirectory(dir.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| LegacyError::io(dir, e))? {
        let path = entry.map_err(|e| LegacyError::io(dir, e))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if path.is_file() && !hidden {
            paths.push(path);
        }
    }
    paths.sort();

    let mut records = BTreeMap::new();
    for path in paths {
        let text = fs::read_to_string(&path).map_err(|e| LegacyError::io(&path, e))?;
        let fields = match parse_record(&text) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Ignoring {}", e.in_file(&path));
                continue;
            }
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = record_key(&fields, identity_field).unwrap_or(stem);
        if records.contains_key(&key) {
            warn!("Ignoring {}: {} was already read from another file", path.display(), key);
            continue;
        }
        debug!("Read {} as {}", path.display(), key);
        records.insert(key, fields);
    }

    info!("Found {} legacy record(s) in {}", records.len(), dir.display());
    Ok(records)
}

/// Legacy files laid out per domain under the configured path template.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    config: SyncConfig,
    device_type: DeviceTypeConfig,
}

impl DirectorySource {
    pub fn new(config: &SyncConfig, device_type: &DeviceTypeConfig) -> Self {
        Self {
            config: config.clone(),
            device_type: device_type.clone(),
        }
    }

    /// Where records for `domain` are read from when no path is given.
    pub fn location(&self, domain: &str) -> PathBuf {
        self.config.legacy_location(domain, &self.device_type.name)
    }
}

impl LegacySource for DirectorySource {
    fn list_legacy_records(
        &self,
        domain: &str,
        path: Option<&Path>,
    ) -> Result<BTreeMap<String, FieldMap>, AccessError> {
        let dir = path.map_or_else(|| self.location(domain), Path::to_path_buf);
        let identity_field = self
            .device_type
            .identity_field
            .as_deref()
            .filter(|_| !self.device_type.is_dumb());
        Ok(read_directory(&dir, identity_field)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn write(dir: &Path, name: &str, text: &str) {
        fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_records_keyed_by_identity_or_stem() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "mms01.cfg", "SN 00012\nDESC stage x\nVELO 2\n");
        write(dir.path(), "slit.cfg", "DESC jaws\nVELO 1\n");
        write(dir.path(), ".hidden", "SN 1\n");

        let records = read_directory(dir.path(), Some("SN")).unwrap();
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["00012", "slit"]);
        assert_eq!(records["00012"]["DESC"], json!("stage x"));
    }

    #[test]
    fn test_bad_and_duplicate_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.cfg", "SN 7\nVELO 1\n");
        write(dir.path(), "b.cfg", "SN 7\nVELO 2\n");
        write(dir.path(), "c.cfg", "= broken\n");

        let records = read_directory(dir.path(), Some("SN")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["7"]["VELO"], json!(1));
    }

    #[test]
    fn test_source_uses_domain_template() {
        let root = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            legacy_path_template: format!("{}/{{domain}}/{{deviceType}}", root.path().display()),
            ..SyncConfig::default()
        };
        let stepper = config.device_type("stepper").unwrap().clone();
        let source = DirectorySource::new(&config, &stepper);
        let dir = root.path().join("lab/stepper");
        fs::create_dir_all(&dir).unwrap();
        write(&dir, "x.cfg", "SN 3\n");

        assert_eq!(source.location("lab"), dir);
        let records = source.list_legacy_records("lab", None).unwrap();
        assert!(records.contains_key("3"));

        let err = source.list_legacy_records("field", None).unwrap_err();
        assert!(matches!(err, AccessError::LegacyUnavailable { .. }));
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.cfg", "SN 9\n");
        let config = SyncConfig::default();
        let stepper = config.device_type("stepper").unwrap().clone();
        let source = DirectorySource::new(&config, &stepper);

        let records = source.list_legacy_records("lab", Some(dir.path())).unwrap();
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["9"]);
    }
}
