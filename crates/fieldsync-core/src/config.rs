//! Tool configuration.
//!
//! The set of supported domains and the device types the engine knows
//! about are explicit configuration passed to the engine at construction.
//! Configuration is read from a JSON file:
//!
//! ```json
//! {
//!   "domains": ["lab", "field"],
//!   "defaultDeviceType": "stepper",
//!   "registryRoot": "/var/lib/fieldsync/registry",
//!   "liveRoot": "/var/lib/fieldsync/live",
//!   "legacyPathTemplate": "/srv/{domain}/device_config/{deviceType}",
//!   "deviceTypes": [
//!     { "name": "stepper", "identityWidth": 8, "configFields": ["VELO", "ACCL"] }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;

/// Default configuration file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fieldsync.json";

/// Errors that can occur while loading or querying configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested domain or device type is not configured.
    NotFound(String),
    /// Failed to read the configuration file.
    ReadError(String),
    /// Configuration data is invalid.
    InvalidData(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Not configured: {}", key),
            ConfigError::ReadError(msg) => write!(f, "Read error: {}", msg),
            ConfigError::InvalidData(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// How one device type is read from live devices and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypeConfig {
    pub name: String,

    /// Live field holding the durable identity. `None` for device types
    /// that are always identified by configuration name.
    #[serde(default = "default_identity_field")]
    pub identity_field: Option<String>,

    #[serde(default = "default_description_field")]
    pub description_field: String,

    #[serde(default = "default_port_field")]
    pub port_field: Option<String>,

    /// Additional fields stored on the object record.
    #[serde(default)]
    pub object_fields: Vec<String>,

    /// Fields stored on the configuration record.
    #[serde(default)]
    pub config_fields: Vec<String>,

    /// Canonical identity width; numeric identities are zero-padded to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_width: Option<usize>,

    /// Devices of this type never carry a durable identity.
    #[serde(default)]
    pub dumb: bool,
}

fn default_identity_field() -> Option<String> {
    Some("SN".to_string())
}

fn default_description_field() -> String {
    "DESC".to_string()
}

fn default_port_field() -> Option<String> {
    Some("PORT".to_string())
}

impl DeviceTypeConfig {
    /// A device type with the default field names and no stored fields.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identity_field: default_identity_field(),
            description_field: default_description_field(),
            port_field: default_port_field(),
            object_fields: Vec::new(),
            config_fields: Vec::new(),
            identity_width: None,
            dumb: false,
        }
    }

    /// Whether records of this type are identified by configuration name.
    pub fn is_dumb(&self) -> bool {
        self.dumb || self.identity_field.is_none()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Supported domains, in resolution order.
    pub domains: Vec<String>,

    pub default_device_type: String,

    pub device_types: Vec<DeviceTypeConfig>,

    /// Root directory of the JSON-file registry.
    pub registry_root: PathBuf,

    /// Root directory of live device field files, if devices are simulated
    /// or mirrored on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_root: Option<PathBuf>,

    /// Location of legacy configuration files; `{domain}` and
    /// `{deviceType}` are substituted.
    pub legacy_path_template: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let stepper = DeviceTypeConfig {
            object_fields: vec!["EE".to_string()],
            config_fields: ["VELO", "VBAS", "ACCL", "HLM", "LLM", "EGU", "MRES", "RC", "HC"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            identity_width: Some(8),
            ..DeviceTypeConfig::new("stepper")
        };
        Self {
            domains: vec!["lab".to_string()],
            default_device_type: stepper.name.clone(),
            device_types: vec![stepper],
            registry_root: PathBuf::from("registry"),
            live_root: None,
            legacy_path_template: "{domain}/device_config/{deviceType}".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidData(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Load `path` if given, else `fieldsync.json` in the working
    /// directory if present, else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domains.is_empty() {
            return Err(ConfigError::InvalidData("no domains configured".to_string()));
        }
        if self.device_types.is_empty() {
            return Err(ConfigError::InvalidData(
                "no device types configured".to_string(),
            ));
        }
        for (i, dt) in self.device_types.iter().enumerate() {
            if self.device_types[..i].iter().any(|d| d.name == dt.name) {
                return Err(ConfigError::InvalidData(format!(
                    "device type '{}' defined twice",
                    dt.name
                )));
            }
        }
        if self.device_type(&self.default_device_type).is_none() {
            return Err(ConfigError::InvalidData(format!(
                "default device type '{}' is not defined",
                self.default_device_type
            )));
        }
        Ok(())
    }

    pub fn device_type(&self, name: &str) -> Option<&DeviceTypeConfig> {
        self.device_types.iter().find(|d| d.name == name)
    }

    /// The requested device type, or the default one.
    pub fn resolve_device_type(
        &self,
        requested: Option<&str>,
    ) -> Result<&DeviceTypeConfig, ConfigError> {
        let name = requested.unwrap_or(&self.default_device_type);
        self.device_type(name)
            .ok_or_else(|| ConfigError::NotFound(format!("device type '{}'", name)))
    }

    /// Known spelling of a domain, matched ignoring case.
    pub fn domain(&self, name: &str) -> Option<&str> {
        self.domains
            .iter()
            .find(|d| d.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Domain named by the first segment of an identifier, if configured.
    pub fn domain_for_identifier(&self, identifier: &str) -> Option<&str> {
        let prefix = match Identifier::parse(identifier) {
            Some(id) => id.prefix().to_string(),
            None => identifier.split(':').next().unwrap_or_default().to_string(),
        };
        self.domain(&prefix)
    }

    /// Domains for an operation: the requested ones if any (each must be
    /// configured), otherwise those inferred from the identifiers.
    pub fn resolve_domains(
        &self,
        requested: &[String],
        identifiers: &[String],
    ) -> Result<Vec<String>, ConfigError> {
        let mut domains: Vec<String> = Vec::new();
        if requested.is_empty() {
            for identifier in identifiers {
                if let Some(domain) = self.domain_for_identifier(identifier) {
                    if !domains.iter().any(|d| d == domain) {
                        domains.push(domain.to_string());
                    }
                }
            }
        } else {
            for name in requested {
                let domain = self
                    .domain(name)
                    .ok_or_else(|| ConfigError::NotFound(format!("domain '{}'", name)))?;
                if !domains.iter().any(|d| d == domain) {
                    domains.push(domain.to_string());
                }
            }
        }
        Ok(domains)
    }

    /// Location of legacy configuration files for a domain.
    pub fn legacy_location(&self, domain: &str, device_type: &str) -> PathBuf {
        PathBuf::from(
            self.legacy_path_template
                .replace("{domain}", domain)
                .replace("{deviceType}", device_type),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn two_domains() -> SyncConfig {
        SyncConfig {
            domains: vec!["lab".to_string(), "field".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_is_valid() {
        SyncConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_json() {
        let config = SyncConfig::from_json_str(
            r#"{
                "domains": ["lab", "field"],
                "defaultDeviceType": "valve",
                "deviceTypes": [
                    { "name": "valve", "identityField": null, "configFields": ["OPEN"] }
                ]
            }"#,
        )
        .unwrap();

        let valve = config.resolve_device_type(None).unwrap();
        assert!(valve.is_dumb());
        assert_eq!(valve.description_field, "DESC");
        assert_eq!(valve.config_fields, vec!["OPEN"]);
        assert_eq!(config.registry_root, PathBuf::from("registry"));
    }

    #[test]
    fn test_rejects_unknown_default_type() {
        let err = SyncConfig::from_json_str(r#"{"defaultDeviceType": "nope"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidData(_)));
    }

    #[test]
    fn test_domain_inference() {
        let config = two_domains();
        assert_eq!(config.domain_for_identifier("FIELD:EXP:MMS:01"), Some("field"));
        assert_eq!(config.domain_for_identifier("XYZ:EXP:MMS:01"), None);

        let ids = vec!["LAB:A:01".to_string(), "LAB:A:02".to_string()];
        assert_eq!(config.resolve_domains(&[], &ids).unwrap(), vec!["lab"]);
        assert_eq!(
            config
                .resolve_domains(&["FIELD".to_string(), "lab".to_string()], &ids)
                .unwrap(),
            vec!["field", "lab"]
        );
        assert!(config.resolve_domains(&["moon".to_string()], &ids).is_err());
    }

    #[test]
    fn test_legacy_location() {
        let config = SyncConfig::default();
        assert_eq!(
            config.legacy_location("lab", "stepper"),
            PathBuf::from("lab/device_config/stepper")
        );
    }
}
