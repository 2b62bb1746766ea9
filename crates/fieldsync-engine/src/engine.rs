//! Top-level synchronization operations.
//!
//! `SyncEngine` ties the configuration, a registry opener, live device
//! access and an operator prompter together. Each operation opens the
//! registries it needs, writes through [`commit`] so views are refreshed
//! after every write, and returns a report instead of printing.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use fieldsync_core::access::read_snapshot;
use fieldsync_core::diff::diff;
use fieldsync_core::identifier::{expand_identifiers_reporting, split_domain_hints, IdentifierError};
use fieldsync_core::naming::next_object_name;
use fieldsync_core::{
    ConfigId, DeviceTypeConfig, DiffMode, DiffReport, LegacySource, LiveAccess, LiveSnapshot,
    ObjectId, ObjectPatch, Registry, RegistryOpener, Snapshot, SyncConfig, NAME_FIELD,
};

use crate::error::{Result, SyncError};
use crate::import::{import_records, ImportReport};
use crate::linkage::{self, commit, link_or_reuse, real_config, Linkage};
use crate::prompt::{AlwaysConfirm, Prompter};
use crate::resolver::{
    find_by_address, find_by_identity, find_freshest, find_freshest_across_registries, Resolved,
};

/// The devices, domains and device type an operation runs on.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub identifiers: Vec<String>,
    pub domains: Vec<String>,
    pub device_type: DeviceTypeConfig,
    /// Tokens that named no device and were left out.
    pub skipped: Vec<IdentifierError>,
}

#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Rename the object and its configuration after the live description.
    pub rename: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self { rename: true }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// New name and description for the object.
    pub name: Option<String>,
    /// Configuration to apply to a device without identity.
    pub config: Option<String>,
    /// Ask the operator to pick and confirm the configuration.
    pub confirm: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            name: None,
            config: None,
            confirm: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Overwrite records already in the registry instead of skipping them.
    pub update: bool,
    /// Read legacy records from here instead of the configured location.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Find the object by durable identity.
    Smart,
    /// Find the object by address and pick the configuration by name.
    Dumb,
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub domain: String,
    pub object: ObjectId,
    pub object_created: bool,
    pub linkage: Linkage,
    pub changes: DiffReport,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub domain: String,
    pub object: ObjectId,
    pub config: ConfigId,
    pub relocated: bool,
    /// Live values before and after; `None` when the device could not be
    /// re-read.
    pub changes: Option<DiffReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityChange {
    pub domain: String,
    pub object: ObjectId,
    /// The identity as stored, possibly padded.
    pub identity: String,
}

#[derive(Debug, Default)]
pub struct IdentityChangeReport {
    pub changed: Vec<IdentityChange>,
    /// Domains that do not know the old identity.
    pub untouched: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
}

/// Result for one device, and the domain it concerns when known.
#[derive(Debug)]
pub struct DeviceOutcome<T> {
    pub identifier: String,
    pub domain: Option<String>,
    pub result: Result<T>,
}

#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<DeviceOutcome<T>>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    fn push(&mut self, identifier: &str, domain: Option<&str>, result: Result<T>) {
        if let Err(e) = &result {
            warn!(
                "{}{}: {}",
                identifier,
                domain.map(|d| format!(" ({})", d)).unwrap_or_default(),
                e
            );
        }
        self.outcomes.push(DeviceOutcome {
            identifier: identifier.to_string(),
            domain: domain.map(String::from),
            result,
        });
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

impl fmt::Display for IdentityChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changed {
            writeln!(
                f,
                "{}: {} identity is now {}",
                change.domain, change.object, change.identity
            )?;
        }
        for (domain, err) in &self.failed {
            writeln!(f, "{}: {}", domain, err)?;
        }
        Ok(())
    }
}

pub struct SyncEngine<O, A, P = AlwaysConfirm> {
    config: SyncConfig,
    opener: O,
    live: A,
    prompter: P,
}

impl<O, A, P> SyncEngine<O, A, P>
where
    O: RegistryOpener,
    A: LiveAccess,
    P: Prompter,
{
    pub fn new(config: SyncConfig, opener: O, live: A, prompter: P) -> Self {
        Self {
            config,
            opener,
            live,
            prompter,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    pub fn live(&self) -> &A {
        &self.live
    }

    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    /// Work out devices, domains and device type from raw tokens.
    ///
    /// Tokens naming a configured domain are domain hints, used when
    /// `domains` is empty; without hints the domain is inferred from the
    /// identifiers. Nothing is written when this fails.
    pub fn plan<S: AsRef<str>>(
        &self,
        tokens: &[S],
        domains: &[String],
        device_type: Option<&str>,
    ) -> Result<Plan> {
        let (hints, rest) = split_domain_hints(tokens, &self.config.domains);
        let (identifiers, skipped) = expand_identifiers_reporting(&rest)
            .filter(|(ids, _)| !ids.is_empty())
            .ok_or_else(|| {
                SyncError::PreliminaryCheck(format!(
                    "no device identifier in '{}'",
                    rest.join(" ")
                ))
            })?;
        for e in &skipped {
            warn!("{}", SyncError::MalformedIdentifier(e.clone()));
        }

        let requested = if domains.is_empty() { hints } else { domains.to_vec() };
        let domains = self
            .config
            .resolve_domains(&requested, &identifiers)
            .map_err(|e| SyncError::PreliminaryCheck(e.to_string()))?;
        if domains.is_empty() {
            return Err(SyncError::PreliminaryCheck(format!(
                "cannot determine the domain of {}",
                identifiers.join(", ")
            )));
        }
        let device_type = self
            .config
            .resolve_device_type(device_type)
            .map_err(|e| SyncError::PreliminaryCheck(e.to_string()))?
            .clone();

        debug!(
            "Plan: {} device(s) in {} as {}",
            identifiers.len(),
            domains.join(","),
            device_type.name
        );
        Ok(Plan {
            identifiers,
            domains,
            device_type,
            skipped,
        })
    }

    fn open(&self, device_type: &DeviceTypeConfig, domain: &str) -> Result<O::Registry> {
        Ok(self.opener.open(&device_type.name, domain)?)
    }

    pub fn read_live(&self, identifier: &str, device_type: &DeviceTypeConfig) -> Result<LiveSnapshot> {
        read_snapshot(&self.live, identifier, device_type)
            .map_err(|e| SyncError::access(format!("read {}", identifier), e))
    }

    fn require_identity(&self, live: &LiveSnapshot, device_type: &DeviceTypeConfig) -> Result<String> {
        if device_type.is_dumb() {
            return Err(SyncError::DeviceKindMismatch {
                identifier: live.identifier.clone(),
                reason: format!("is a {} device without durable identity", device_type.name),
            });
        }
        live.identity.clone().ok_or_else(|| {
            SyncError::PreliminaryCheck(format!("could not read the identity of {}", live.identifier))
        })
    }

    /// Capture the device's live values into the `domain` registry.
    pub fn save(
        &self,
        identifier: &str,
        domain: &str,
        device_type: &DeviceTypeConfig,
        opts: &SaveOptions,
    ) -> Result<SaveOutcome> {
        let live = self.read_live(identifier, device_type)?;
        let identity = self.require_identity(&live, device_type)?;
        let mut registry = self.open(device_type, domain)?;
        info!("Saving {} ({}) to {}", identifier, identity, domain);

        let (object, object_created, before) = match find_by_identity(&registry, &identity) {
            Some(object) => {
                let before = stored_snapshot(&registry, object, "before");
                commit(&mut registry, &format!("update {}", object), |r| {
                    r.update_object(object, &live.object_patch())
                })?;
                (object, false, before)
            }
            None => {
                info!("Identity {} not in {}, adding a new object", identity, domain);
                let name = next_object_name(&registry, name_hint(&live), None)?;
                let mut patch = live.object_patch();
                patch.name = Some(name.clone());
                let object = commit(&mut registry, &format!("create object '{}'", name), |r| {
                    r.create_object(&patch)
                })?;
                (object, true, Snapshot::new("before"))
            }
        };

        let linkage = link_or_reuse(&mut registry, object, &live.config_fields, name_hint(&live))?;
        if let Linkage::Created(config) = linkage {
            info!("Linked {} to new configuration {}", object, config);
        }

        if opts.rename && !live.description.is_empty() {
            linkage::rename(&mut registry, object, &live.description, &live.description)?;
        }

        let after = stored_snapshot(&registry, object, "after");
        Ok(SaveOutcome {
            domain: domain.to_string(),
            object,
            object_created,
            linkage,
            changes: diff(&before, &after, DiffMode::Changes),
        })
    }

    /// Push the stored configuration of a device found by identity.
    ///
    /// The most recently modified object across `domains` wins. Its
    /// address and port are updated to where the device is now before the
    /// configuration is pushed.
    pub fn apply(
        &self,
        identifier: &str,
        domains: &[String],
        device_type: &DeviceTypeConfig,
        opts: &ApplyOptions,
    ) -> Result<ApplyOutcome> {
        let live = self.read_live(identifier, device_type)?;
        if device_type.is_dumb() || live.is_dumb() {
            return Err(SyncError::DeviceKindMismatch {
                identifier: identifier.to_string(),
                reason: "has no durable identity, use dmapply".to_string(),
            });
        }
        let identity = self.require_identity(&live, device_type)?;

        let resolved =
            find_freshest_across_registries(&self.opener, domains, &identity, &device_type.name)
                .ok_or_else(|| SyncError::IdentityNotFound {
                    identity: identity.clone(),
                    domains: domains.join(","),
                })?;
        info!("Applying {} from {}", identity, resolved.domain);
        self.push(resolved, &live, device_type, opts, ApplyMode::Smart)
    }

    /// Apply a configuration chosen by name to a device without identity.
    ///
    /// The object is found by the device's address, or created in the
    /// first domain. The configuration must exist in that object's
    /// registry.
    pub fn apply_dumb(
        &self,
        identifier: &str,
        domains: &[String],
        device_type: &DeviceTypeConfig,
        opts: &ApplyOptions,
    ) -> Result<ApplyOutcome> {
        let live = self.read_live(identifier, device_type)?;
        if !device_type.is_dumb() && !live.is_dumb() {
            return Err(SyncError::DeviceKindMismatch {
                identifier: identifier.to_string(),
                reason: "has a durable identity, use apply".to_string(),
            });
        }

        let resolved = match find_freshest(&self.opener, &device_type.name, domains, |r| {
            find_by_address(r, identifier)
        }) {
            Some(resolved) => resolved,
            None => {
                let domain = domains.first().ok_or_else(|| {
                    SyncError::PreliminaryCheck(format!("no domain for {}", identifier))
                })?;
                let mut registry = self.open(device_type, domain)?;
                let name = next_object_name(&registry, identifier, None)?;
                let mut patch = live.object_patch();
                patch.name = Some(name.clone());
                let object = commit(&mut registry, &format!("create object '{}'", name), |r| {
                    r.create_object(&patch)
                })?;
                info!("Added {} for {} to {}", name, identifier, domain);
                Resolved {
                    domain: domain.clone(),
                    registry,
                    object,
                }
            }
        };
        self.push(resolved, &live, device_type, opts, ApplyMode::Dumb)
    }

    fn push(
        &self,
        resolved: Resolved<O::Registry>,
        live: &LiveSnapshot,
        device_type: &DeviceTypeConfig,
        opts: &ApplyOptions,
        mode: ApplyMode,
    ) -> Result<ApplyOutcome> {
        let Resolved {
            domain,
            mut registry,
            object,
        } = resolved;
        let identifier = live.identifier.as_str();

        let relocated =
            linkage::relocate(&mut registry, object, identifier, live.port.as_deref())?;

        if let Some(name) = &opts.name {
            let current = registry.object(object).map(|o| o.name.clone());
            let unique = next_object_name(&registry, name, current.as_deref())?;
            commit(&mut registry, &format!("rename {}", object), |r| {
                r.update_object(object, &ObjectPatch::rename(&unique, name))
            })?;
        }

        if mode == ApplyMode::Dumb {
            let config = self.choose_config(&registry, &domain, object, identifier, opts)?;
            linkage::link_to(&mut registry, object, config)?;
            if opts.name.is_none() {
                let config_name = registry
                    .config(config)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                let current = registry.object(object).map(|o| o.name.clone());
                let unique = next_object_name(&registry, &config_name, current.as_deref())?;
                commit(&mut registry, &format!("rename {}", object), |r| {
                    r.update_object(object, &ObjectPatch::rename(&unique, &config_name))
                })?;
            }
        }

        let config = real_config(&registry, object).ok_or_else(|| SyncError::InvalidConfigLinkage {
            object,
            domain: domain.clone(),
            reason: "not linked to a configuration of its own".to_string(),
        })?;

        commit(&mut registry, &format!("apply {} to {}", config, identifier), |r| {
            r.apply_config_to_device(object)
        })?;
        info!("Applied {} to {}", config, identifier);

        let changes = match self.read_live(identifier, device_type) {
            Ok(after) => Some(diff(
                &Snapshot::from_live("before", live),
                &Snapshot::from_live("after", &after),
                DiffMode::Changes,
            )),
            Err(e) => {
                warn!("Could not re-read {} after apply: {}", identifier, e);
                None
            }
        };

        Ok(ApplyOutcome {
            domain,
            object,
            config,
            relocated,
            changes,
        })
    }

    fn choose_config(
        &self,
        registry: &O::Registry,
        domain: &str,
        object: ObjectId,
        identifier: &str,
        opts: &ApplyOptions,
    ) -> Result<ConfigId> {
        let placeholder = registry.placeholder();
        let known: Vec<String> = registry
            .configs()
            .values()
            .filter(|c| c.id != placeholder)
            .map(|c| c.name.clone())
            .collect();
        let invalid = |reason: String| SyncError::InvalidConfigLinkage {
            object,
            domain: domain.to_string(),
            reason,
        };

        let mut candidate = opts.config.clone();
        loop {
            match candidate.as_deref() {
                Some(name) => {
                    let found = registry
                        .config_by_name(name)
                        .filter(|c| c.id != placeholder)
                        .map(|c| c.id);
                    match found {
                        Some(config) if !opts.confirm => return Ok(config),
                        Some(config) => {
                            let question =
                                format!("Apply configuration '{}' to {}?", name, identifier);
                            if self.prompter.confirm(&question) {
                                return Ok(config);
                            }
                        }
                        None if !opts.confirm => {
                            return Err(invalid(format!("no configuration named '{}'", name)))
                        }
                        None => warn!("No configuration named '{}' in {}", name, domain),
                    }
                }
                None if !opts.confirm => {
                    return Err(invalid("no configuration chosen".to_string()));
                }
                None => {}
            }

            let suggestions = candidate
                .as_deref()
                .map(|name| self.prompter.suggest(name, &known))
                .unwrap_or_default();
            let question = if suggestions.is_empty() {
                format!("Configuration to apply to {} ('quit' to abort)", identifier)
            } else {
                format!(
                    "Closest matches: {}\nConfiguration to apply to {} ('quit' to abort)",
                    suggestions.join(", "),
                    identifier
                )
            };
            match self.prompter.ask(&question).map(|a| a.trim().to_string()) {
                Some(answer) if !answer.is_empty() && answer != "quit" => {
                    candidate = Some(answer)
                }
                _ => return Err(SyncError::Cancelled),
            }
        }
    }

    /// Compare the stored records of a device with its live values.
    pub fn diff(
        &self,
        identifier: &str,
        domain: &str,
        device_type: &DeviceTypeConfig,
    ) -> Result<DiffReport> {
        let live = self.read_live(identifier, device_type)?;
        let identity = self.require_identity(&live, device_type)?;
        let registry = self.open(device_type, domain)?;

        let object =
            find_by_identity(&registry, &identity).ok_or_else(|| SyncError::IdentityNotFound {
                identity: identity.clone(),
                domains: domain.to_string(),
            })?;
        let config = real_config(&registry, object).ok_or_else(|| {
            SyncError::InvalidConfigLinkage {
                object,
                domain: domain.to_string(),
                reason: "nothing saved to compare against".to_string(),
            }
        })?;

        let mut stored = Snapshot::from_records(
            "registry",
            registry.object(object),
            registry.config(config),
        );
        stored.object.remove(NAME_FIELD);
        Ok(diff(&stored, &Snapshot::from_live("live", &live), DiffMode::Full))
    }

    /// Replace identity `old` with `new` in every domain that has it.
    /// An empty `domains` means all configured domains.
    ///
    /// A blank identity on either side is refused before any registry is
    /// opened.
    pub fn change_identity(
        &self,
        old: &str,
        new: &str,
        domains: &[String],
        device_type: &DeviceTypeConfig,
    ) -> Result<IdentityChangeReport> {
        if old.trim().is_empty() || new.trim().is_empty() {
            return Err(SyncError::PreliminaryCheck(format!(
                "identities must not be blank (old '{}', new '{}')",
                old, new
            )));
        }
        if device_type.is_dumb() {
            return Err(SyncError::DeviceKindMismatch {
                identifier: device_type.name.clone(),
                reason: "devices have no durable identity to change".to_string(),
            });
        }
        let domains = if domains.is_empty() {
            self.config.domains.clone()
        } else {
            domains.to_vec()
        };
        let mut report = IdentityChangeReport::default();

        for domain in &domains {
            let mut registry = match self.open(device_type, domain) {
                Ok(registry) => registry,
                Err(e) => {
                    warn!("Skipping {}: {}", domain, e);
                    report.failed.push((domain.clone(), e));
                    continue;
                }
            };
            let Some(object) = find_by_identity(&registry, old) else {
                debug!("{} not in {}", old, domain);
                report.untouched.push(domain.clone());
                continue;
            };
            match linkage::change_identity(&mut registry, object, new) {
                Ok(identity) => {
                    info!("{} in {}: identity {} -> {}", object, domain, old, identity);
                    report.changed.push(IdentityChange {
                        domain: domain.clone(),
                        object,
                        identity,
                    });
                }
                Err(e) => report.failed.push((domain.clone(), e)),
            }
        }

        Ok(report)
    }

    /// Merge legacy records into each domain's registry.
    pub fn import<S: LegacySource + ?Sized>(
        &self,
        source: &S,
        domains: &[String],
        device_type: &DeviceTypeConfig,
        opts: &ImportOptions,
    ) -> Result<Vec<Result<ImportReport>>> {
        if domains.is_empty() {
            return Err(SyncError::PreliminaryCheck(
                "import needs at least one domain".to_string(),
            ));
        }
        let domains = self
            .config
            .resolve_domains(domains, &[])
            .map_err(|e| SyncError::PreliminaryCheck(e.to_string()))?;

        let mut reports = Vec::new();
        for domain in &domains {
            reports.push(self.import_domain(source, domain, device_type, opts));
        }
        Ok(reports)
    }

    fn import_domain<S: LegacySource + ?Sized>(
        &self,
        source: &S,
        domain: &str,
        device_type: &DeviceTypeConfig,
        opts: &ImportOptions,
    ) -> Result<ImportReport> {
        let records = source
            .list_legacy_records(domain, opts.path.as_deref())
            .map_err(|e| SyncError::access(format!("legacy records for {}", domain), e))?;
        let mut registry = self.open(device_type, domain)?;
        info!("Importing {} legacy record(s) into {}", records.len(), domain);
        Ok(import_records(&mut registry, device_type, &records, opts.update))
    }

    /// [`save`](Self::save) every planned device into every planned domain.
    pub fn save_many(&self, plan: &Plan, opts: &SaveOptions) -> BatchReport<SaveOutcome> {
        let mut report = BatchReport::default();
        for identifier in &plan.identifiers {
            for domain in &plan.domains {
                let result = self.save(identifier, domain, &plan.device_type, opts);
                report.push(identifier, Some(domain), result);
            }
        }
        report
    }

    /// Apply every planned device from the freshest of the planned domains.
    pub fn apply_many(
        &self,
        plan: &Plan,
        opts: &ApplyOptions,
        mode: ApplyMode,
    ) -> BatchReport<ApplyOutcome> {
        let mut report = BatchReport::default();
        for identifier in &plan.identifiers {
            let result = match mode {
                ApplyMode::Smart => self.apply(identifier, &plan.domains, &plan.device_type, opts),
                ApplyMode::Dumb => {
                    self.apply_dumb(identifier, &plan.domains, &plan.device_type, opts)
                }
            };
            let domain = result.as_ref().ok().map(|o| o.domain.clone());
            report.push(identifier, domain.as_deref(), result);
        }
        report
    }

    /// [`diff`](Self::diff) every planned device in every planned domain.
    pub fn diff_many(&self, plan: &Plan) -> BatchReport<DiffReport> {
        let mut report = BatchReport::default();
        for identifier in &plan.identifiers {
            for domain in &plan.domains {
                let result = self.diff(identifier, domain, &plan.device_type);
                report.push(identifier, Some(domain), result);
            }
        }
        report
    }
}

/// Candidate name for new records: the description, else the identifier.
fn name_hint(live: &LiveSnapshot) -> &str {
    if live.description.trim().is_empty() {
        &live.identifier
    } else {
        live.description.trim()
    }
}

fn stored_snapshot<R: Registry + ?Sized>(registry: &R, object: ObjectId, label: &str) -> Snapshot {
    let record = registry.object(object);
    let config = real_config(registry, object).and_then(|c| registry.config(c));
    Snapshot::from_records(label, record, config)
}
