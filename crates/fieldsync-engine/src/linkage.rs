//! Object to configuration linkage.
//!
//! Every registry write goes through [`commit`], which refreshes the view
//! right after the write so later reads never see stale names or links.

use tracing::{debug, info};

use fieldsync_core::naming::{next_config_name, next_object_name};
use fieldsync_core::{
    ConfigId, ConfigLink, ConfigPatch, FieldMap, ObjectId, ObjectPatch, Registry, RegistryError,
};

use crate::error::{Result, SyncError};

/// How a save linked the object's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// The object's private configuration was updated in place.
    Reused(ConfigId),
    /// A new configuration was created and linked.
    Created(ConfigId),
}

impl Linkage {
    pub fn config(&self) -> ConfigId {
        match self {
            Linkage::Reused(id) | Linkage::Created(id) => *id,
        }
    }
}

/// Run one registry write, then refresh the view.
pub fn commit<R, T, F>(registry: &mut R, context: &str, write: F) -> Result<T>
where
    R: Registry + ?Sized,
    F: FnOnce(&mut R) -> std::result::Result<T, RegistryError>,
{
    let out = write(registry).map_err(|e| SyncError::write(context, e))?;
    registry
        .refresh()
        .map_err(|e| SyncError::write(format!("refresh after {}", context), e))?;
    Ok(out)
}

/// The object's configuration when it is a real one in this registry.
pub fn real_config<R: Registry + ?Sized>(registry: &R, object: ObjectId) -> Option<ConfigId> {
    let config = registry.object(object)?.config.real_config()?;
    registry.config(config).map(|c| c.id)
}

/// Store `fields` as the object's configuration.
///
/// An object already linked to a real configuration has it updated in
/// place. Otherwise (unlinked, or pointing at the placeholder) a new
/// configuration named after `name` is created and linked, so the shared
/// placeholder is never written.
pub fn link_or_reuse<R: Registry + ?Sized>(
    registry: &mut R,
    object: ObjectId,
    fields: &FieldMap,
    name: &str,
) -> Result<Linkage> {
    let record = registry
        .object(object)
        .ok_or(RegistryError::ObjectNotFound(object))?;
    let (object_name, link) = (record.name.clone(), record.config);

    if let Some(config) = real_config(registry, object) {
        debug!("Updating {} of {} in place", config, object_name);
        commit(registry, &format!("update configuration {}", config), |r| {
            r.update_config(config, &ConfigPatch::fields(fields.clone()))
        })?;
        return Ok(Linkage::Reused(config));
    }

    if let ConfigLink::Placeholder(_) = link {
        info!("{} has no configuration of its own, creating one", object_name);
    }
    let config_name = next_config_name(registry, name, None)?;
    let config = commit(
        registry,
        &format!("create configuration '{}'", config_name),
        |r| r.create_config(&config_name, fields),
    )?;
    commit(registry, &format!("link {} to {}", object, config), |r| {
        r.link_object_to_config(object, config)
    })?;
    Ok(Linkage::Created(config))
}

/// Point the object at `config`, unless it already does.
pub fn link_to<R: Registry + ?Sized>(
    registry: &mut R,
    object: ObjectId,
    config: ConfigId,
) -> Result<bool> {
    let current = registry
        .object(object)
        .ok_or(RegistryError::ObjectNotFound(object))?
        .config
        .config_id();
    if current == Some(config) {
        return Ok(false);
    }
    commit(registry, &format!("link {} to {}", object, config), |r| {
        r.link_object_to_config(object, config)
    })?;
    Ok(true)
}

/// Record where the device currently is. Returns whether anything changed.
pub fn relocate<R: Registry + ?Sized>(
    registry: &mut R,
    object: ObjectId,
    address: &str,
    port: Option<&str>,
) -> Result<bool> {
    let record = registry
        .object(object)
        .ok_or(RegistryError::ObjectNotFound(object))?;
    if record.address == address && (port.is_none() || record.port.as_deref() == port) {
        return Ok(false);
    }
    info!(
        "{} moved from {} to {}",
        record.name,
        if record.address.is_empty() { "nowhere" } else { record.address.as_str() },
        address
    );
    let patch = ObjectPatch::location(address, port.map(String::from));
    commit(registry, &format!("relocate {}", object), |r| {
        r.update_object(object, &patch)
    })?;
    Ok(true)
}

/// Rename the object and, when it owns a real configuration, that
/// configuration too. Names are made unique within their namespace.
pub fn rename<R: Registry + ?Sized>(
    registry: &mut R,
    object: ObjectId,
    name: &str,
    description: &str,
) -> Result<()> {
    let record = registry
        .object(object)
        .ok_or(RegistryError::ObjectNotFound(object))?;
    let object_name = next_object_name(registry, name, Some(&record.name))?;
    let patch = ObjectPatch::rename(&object_name, description);
    commit(registry, &format!("rename {}", object), |r| {
        r.update_object(object, &patch)
    })?;

    if let Some(config) = real_config(registry, object) {
        rename_config(registry, config, name)?;
    }
    Ok(())
}

/// Give a configuration a unique name derived from `name`.
pub fn rename_config<R: Registry + ?Sized>(
    registry: &mut R,
    config: ConfigId,
    name: &str,
) -> Result<String> {
    let current = registry
        .config(config)
        .ok_or(RegistryError::ConfigNotFound(config))?
        .name
        .clone();
    let config_name = next_config_name(registry, name, Some(&current))?;
    if config_name != current {
        let patch = ConfigPatch {
            name: Some(config_name.clone()),
            fields: FieldMap::new(),
        };
        commit(registry, &format!("rename configuration {}", config), |r| {
            r.update_config(config, &patch)
        })?;
    }
    Ok(config_name)
}

/// Overwrite the object's durable identity and return the value the
/// registry actually stored. A blank identity is refused without writing.
pub fn change_identity<R: Registry + ?Sized>(
    registry: &mut R,
    object: ObjectId,
    identity: &str,
) -> Result<String> {
    if registry.canonical_identity(identity).is_empty() {
        return Err(SyncError::PreliminaryCheck(format!(
            "refusing to clear the identity of {}",
            object
        )));
    }
    commit(registry, &format!("change identity of {}", object), |r| {
        r.update_object(object, &ObjectPatch::identity(identity))
    })?;
    registry
        .object(object)
        .and_then(|o| o.identity.clone())
        .ok_or_else(|| {
            SyncError::write(
                format!("change identity of {}", object),
                RegistryError::ObjectNotFound(object),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{MemoryBackend, MemoryRegistry, RegistryOp, RegistryOpener};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> (MemoryBackend, MemoryRegistry, ObjectId) {
        let backend = MemoryBackend::new();
        let mut reg = backend.open("stepper", "lab").unwrap();
        let obj = commit(&mut reg, "create", |r| {
            r.create_object(&ObjectPatch {
                name: Some("stage x".to_string()),
                identity: Some("001".to_string()),
                address: Some("LAB:EXP:MMS:01".to_string()),
                ..Default::default()
            })
        })
        .unwrap();
        (backend, reg, obj)
    }

    fn fields(velo: i64) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("VELO".to_string(), json!(velo));
        map
    }

    #[test]
    fn test_placeholder_link_creates_new_config() {
        let (_, mut reg, obj) = registry();
        let placeholder = reg.object(obj).unwrap().config.config_id().unwrap();

        let linkage = link_or_reuse(&mut reg, obj, &fields(2), "stage x").unwrap();
        let Linkage::Created(config) = linkage else {
            panic!("expected a new configuration, got {:?}", linkage);
        };
        assert_ne!(config, placeholder);
        assert_eq!(reg.object(obj).unwrap().config, ConfigLink::Real(config));
        assert!(reg.config(placeholder).unwrap().fields.is_empty());
        assert_eq!(reg.config(config).unwrap().name, "stage x");
    }

    #[test]
    fn test_private_config_is_reused() {
        let (_, mut reg, obj) = registry();
        let first = link_or_reuse(&mut reg, obj, &fields(2), "stage x").unwrap();
        let second = link_or_reuse(&mut reg, obj, &fields(5), "stage x").unwrap();

        assert_eq!(second, Linkage::Reused(first.config()));
        assert_eq!(reg.config(first.config()).unwrap().fields["VELO"], json!(5));
        assert_eq!(reg.configs().len(), 2);
    }

    #[test]
    fn test_new_config_name_avoids_collision() {
        let (_, mut reg, obj) = registry();
        commit(&mut reg, "seed", |r| r.create_config("stage x", &FieldMap::new())).unwrap();
        let linkage = link_or_reuse(&mut reg, obj, &fields(1), "stage x").unwrap();
        assert_eq!(reg.config(linkage.config()).unwrap().name, "stage x-2");
    }

    #[test]
    fn test_failed_link_leaves_orphan_config() {
        let (backend, mut reg, obj) = registry();
        backend.fail_next(RegistryOp::Link);

        let err = link_or_reuse(&mut reg, obj, &fields(1), "stage x").unwrap_err();
        assert!(matches!(err, SyncError::RegistryWrite { .. }));
        assert!(reg.config_by_name("stage x").is_some());
        assert!(!reg.object(obj).unwrap().config.is_linked_to_real_config());
    }

    #[test]
    fn test_relocate_only_when_moved() {
        let (_, mut reg, obj) = registry();
        assert!(!relocate(&mut reg, obj, "LAB:EXP:MMS:01", None).unwrap());
        assert!(relocate(&mut reg, obj, "LAB:EXP:MMS:04", Some("3")).unwrap());
        let record = reg.object(obj).unwrap();
        assert_eq!(record.address, "LAB:EXP:MMS:04");
        assert_eq!(record.port.as_deref(), Some("3"));
    }

    #[test]
    fn test_rename_object_and_config() {
        let (_, mut reg, obj) = registry();
        let config = link_or_reuse(&mut reg, obj, &fields(1), "tmp").unwrap().config();
        rename(&mut reg, obj, "mirror pitch", "mirror pitch").unwrap();

        assert_eq!(reg.object(obj).unwrap().name, "mirror pitch");
        assert_eq!(reg.object(obj).unwrap().description, "mirror pitch");
        assert_eq!(reg.config(config).unwrap().name, "mirror pitch");

        // Renaming to the current name keeps it.
        rename(&mut reg, obj, "mirror pitch", "mirror pitch").unwrap();
        assert_eq!(reg.object(obj).unwrap().name, "mirror pitch");
        assert_eq!(reg.config(config).unwrap().name, "mirror pitch");
    }

    #[test]
    fn test_blank_identity_is_not_written() {
        let (_, mut reg, obj) = registry();
        let err = change_identity(&mut reg, obj, "   ").unwrap_err();
        assert!(matches!(err, SyncError::PreliminaryCheck(_)));
        assert_eq!(reg.object(obj).unwrap().identity.as_deref(), Some("001"));
    }

    #[test]
    fn test_link_to_is_idempotent() {
        let (_, mut reg, obj) = registry();
        let config = commit(&mut reg, "seed", |r| r.create_config("shared", &fields(3))).unwrap();
        assert!(link_to(&mut reg, obj, config).unwrap());
        assert!(!link_to(&mut reg, obj, config).unwrap());
    }
}
