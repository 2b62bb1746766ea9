//! Finding the registry object that belongs to a device.

use tracing::{debug, warn};

use fieldsync_core::{ObjectId, ObjectRecord, Registry, RegistryOpener};

/// An object found in one domain's registry, with the open registry.
#[derive(Debug)]
pub struct Resolved<R> {
    pub domain: String,
    pub registry: R,
    pub object: ObjectId,
}

impl<R: Registry> Resolved<R> {
    pub fn record(&self) -> Option<&ObjectRecord> {
        self.registry.object(self.object)
    }
}

/// Object holding `identity`. The identity is canonicalized for the
/// registry before comparing.
pub fn find_by_identity<R: Registry + ?Sized>(registry: &R, identity: &str) -> Option<ObjectId> {
    let wanted = registry.canonical_identity(identity);
    if wanted.is_empty() {
        return None;
    }
    registry
        .objects()
        .values()
        .find(|o| o.identity.as_deref() == Some(wanted.as_str()))
        .map(|o| o.id)
}

/// Object last seen at live address `address`.
pub fn find_by_address<R: Registry + ?Sized>(registry: &R, address: &str) -> Option<ObjectId> {
    registry
        .objects()
        .values()
        .find(|o| o.address == address)
        .map(|o| o.id)
}

/// Search every domain with `find` and keep the most recently modified
/// match. Ties go to the earlier domain. Domains whose registry cannot be
/// opened are skipped.
pub fn find_freshest<O, F>(
    opener: &O,
    device_type: &str,
    domains: &[String],
    find: F,
) -> Option<Resolved<O::Registry>>
where
    O: RegistryOpener,
    F: Fn(&O::Registry) -> Option<ObjectId>,
{
    let mut best: Option<Resolved<O::Registry>> = None;

    for domain in domains {
        let registry = match opener.open(device_type, domain) {
            Ok(registry) => registry,
            Err(e) => {
                warn!("Skipping {}: {}", domain, e);
                continue;
            }
        };
        let Some(object) = find(&registry) else {
            debug!("No match in {}", domain);
            continue;
        };
        let modified = registry.object(object).map(|o| o.last_modified);
        let fresher = match (&best, modified) {
            (None, _) => true,
            (Some(current), Some(at)) => current.record().map_or(true, |o| at > o.last_modified),
            (Some(_), None) => false,
        };
        debug!("Match {} in {} (modified {:?})", object, domain, modified);
        if fresher {
            best = Some(Resolved {
                domain: domain.clone(),
                registry,
                object,
            });
        }
    }

    best
}

/// [`find_freshest`] by durable identity.
pub fn find_freshest_across_registries<O: RegistryOpener>(
    opener: &O,
    domains: &[String],
    identity: &str,
    device_type: &str,
) -> Option<Resolved<O::Registry>> {
    find_freshest(opener, device_type, domains, |registry| {
        find_by_identity(registry, identity)
    })
}
