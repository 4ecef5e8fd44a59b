//! Registration store.
//!
//! Producers never touch the grouped table. They push changes into a pending
//! buffer through a [`RegistrationHandle`]; the reconciliation loop drains the
//! buffer at the start of each cycle, so a cycle always works on a consistent
//! snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use serde::Serialize;

use crate::comparator::ResourceComparator;
use crate::error::RegistrationError;
use crate::resource::{EntityId, RegisteredResource, Registration, ResourceState};
use crate::stats::InstallerStats;

/// The ordered registration set of one entity, shared with the tasks that
/// operate on it so they can re-read the latest state at execution time.
pub type SharedRegistrations = Arc<RwLock<EntityRegistrations>>;

pub fn read_set(shared: &SharedRegistrations) -> RwLockReadGuard<'_, EntityRegistrations> {
    match shared.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Registration set lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub fn write_set(shared: &SharedRegistrations) -> RwLockWriteGuard<'_, EntityRegistrations> {
    match shared.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Registration set lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// All competing resources for a single entity, kept in comparator order.
#[derive(Debug, Clone)]
pub struct EntityRegistrations {
    entity: EntityId,
    resources: Vec<RegisteredResource>,
}

impl EntityRegistrations {
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            resources: Vec::new(),
        }
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn resources(&self) -> &[RegisteredResource] {
        &self.resources
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The first installable resource in sort order.
    pub fn candidate(&self) -> Option<&RegisteredResource> {
        self.resources.iter().find(|r| r.installable)
    }

    pub fn has_installable(&self) -> bool {
        self.candidate().is_some()
    }

    /// Adds or replaces the resource of the same origin. Returns true if the
    /// set changed.
    fn upsert(&mut self, resource: RegisteredResource) -> bool {
        match self
            .resources
            .iter_mut()
            .find(|existing| existing.origin == resource.origin)
        {
            Some(existing) if existing.same_declaration(&resource) => {
                // Not yet applied (never run, or failed): announce it again.
                if existing.installable && existing.state != ResourceState::Install {
                    return false;
                }
                existing.installable = true;
                existing.state = ResourceState::Install;
                true
            }
            Some(existing) => {
                *existing = resource;
                true
            }
            None => {
                self.resources.push(resource);
                true
            }
        }
    }

    /// Marks the origin's resource as no longer wanted. Returns true if the
    /// set changed.
    fn withdraw(&mut self, origin: &str) -> bool {
        let mut changed = false;
        for resource in self
            .resources
            .iter_mut()
            .filter(|r| r.origin == origin && r.installable)
        {
            resource.installable = false;
            resource.state = ResourceState::Uninstall;
            changed = true;
        }
        changed
    }

    fn sort(&mut self, comparator: &ResourceComparator) {
        comparator.sort(&mut self.resources);
    }

    /// Records that `applied` (or nothing, for a removal) is now the live
    /// content of the entity.
    pub fn mark_applied(&mut self, applied: Option<u64>) {
        for resource in &mut self.resources {
            resource.state = if Some(resource.serial) == applied {
                ResourceState::Installed
            } else if resource.installable {
                ResourceState::Ignored
            } else {
                ResourceState::Uninstalled
            };
        }
    }

    /// Drops withdrawn resources whose removal has been applied.
    pub fn compact(&mut self) {
        self.resources
            .retain(|r| r.installable || r.state != ResourceState::Uninstalled);
    }

    pub fn describe(&self) -> EntityDescription {
        EntityDescription {
            entity: self.entity.clone(),
            resources: self
                .resources
                .iter()
                .map(|r| ResourceDescription {
                    origin: r.origin.clone(),
                    priority: r.priority,
                    version: r.version.as_ref().map(|v| v.to_string()),
                    digest: r.digest.clone(),
                    serial: r.serial,
                    installable: r.installable,
                    state: r.state,
                })
                .collect(),
        }
    }
}

/// Serialisable view of one entity's registration set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescription {
    pub entity: EntityId,
    pub resources: Vec<ResourceDescription>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    pub origin: String,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub digest: String,
    pub serial: u64,
    pub installable: bool,
    pub state: ResourceState,
}

#[derive(Debug)]
enum StoreChange {
    Register(RegisteredResource),
    Withdraw { entity: EntityId, origin: String },
    WithdrawOrigin(String),
    ReplaceOrigin {
        origin: String,
        resources: Vec<RegisteredResource>,
    },
}

/// Producer-side access to the store. Cheap to clone, safe to use from any
/// thread; never blocks on host operations.
#[derive(Clone, Debug)]
pub struct RegistrationHandle {
    pending: Arc<Mutex<Vec<StoreChange>>>,
    serial: Arc<AtomicU64>,
    stats: Arc<InstallerStats>,
}

impl RegistrationHandle {
    fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
            serial: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(InstallerStats::new()),
        }
    }

    fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn pending(&self) -> MutexGuard<'_, Vec<StoreChange>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Registration buffer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Validates and queues a registration. Malformed input never enters the
    /// store.
    pub fn register(&self, registration: Registration) -> Result<EntityId, RegistrationError> {
        let resource = registration.into_resource(self.next_serial())?;
        let entity = resource.entity.clone();
        debug!(
            "Queued registration {} v{} from '{}' (priority {})",
            entity,
            resource.version_label(),
            resource.origin,
            resource.priority
        );
        self.pending().push(StoreChange::Register(resource));
        self.stats.record_registrations(1);
        Ok(entity)
    }

    /// Queues withdrawal of one origin's declaration for an entity.
    pub fn withdraw(&self, entity: &EntityId, origin: &str) {
        self.pending().push(StoreChange::Withdraw {
            entity: entity.clone(),
            origin: origin.to_string(),
        });
        self.stats.record_withdrawal();
    }

    /// Queues withdrawal of everything the origin has registered.
    pub fn withdraw_origin(&self, origin: &str) {
        self.pending()
            .push(StoreChange::WithdrawOrigin(origin.to_string()));
        self.stats.record_withdrawal();
    }

    /// Makes `registrations` the complete set declared by `origin`: anything
    /// else the origin registered before is withdrawn. Either all entries are
    /// accepted or none.
    pub fn replace_origin(
        &self,
        origin: &str,
        registrations: Vec<Registration>,
    ) -> Result<Vec<EntityId>, RegistrationError> {
        let mut resources = Vec::with_capacity(registrations.len());
        for mut registration in registrations {
            registration.origin = origin.to_string();
            resources.push(registration.into_resource(self.next_serial())?);
        }
        let entities: Vec<EntityId> = resources.iter().map(|r| r.entity.clone()).collect();
        self.pending().push(StoreChange::ReplaceOrigin {
            origin: origin.to_string(),
            resources,
        });
        self.stats.record_registrations(entities.len() as u64);
        Ok(entities)
    }

    /// Number of changes waiting for the next cycle.
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    fn take(&self) -> Vec<StoreChange> {
        std::mem::take(&mut *self.pending())
    }
}

/// Loop-side grouped table of registration sets.
#[derive(Debug)]
pub struct RegistrationStore {
    handle: RegistrationHandle,
    comparator: ResourceComparator,
    groups: BTreeMap<EntityId, SharedRegistrations>,
}

impl RegistrationStore {
    pub fn new(comparator: ResourceComparator) -> Self {
        Self {
            handle: RegistrationHandle::new(),
            comparator,
            groups: BTreeMap::new(),
        }
    }

    pub fn handle(&self) -> RegistrationHandle {
        self.handle.clone()
    }

    pub fn comparator(&self) -> &ResourceComparator {
        &self.comparator
    }

    /// Counters shared with every handle of this store.
    pub fn stats(&self) -> Arc<InstallerStats> {
        Arc::clone(&self.handle.stats)
    }

    /// Drains the pending buffer into the grouped table. Returns the entities
    /// whose registration set changed.
    pub fn drain(&mut self) -> BTreeSet<EntityId> {
        let mut touched = BTreeSet::new();
        for change in self.handle.take() {
            match change {
                StoreChange::Register(resource) => {
                    touched.extend(self.merge(vec![resource]));
                }
                StoreChange::Withdraw { entity, origin } => {
                    if self.withdraw_in(&entity, &origin) {
                        touched.insert(entity);
                    }
                }
                StoreChange::WithdrawOrigin(origin) => {
                    let entities: Vec<EntityId> = self.groups.keys().cloned().collect();
                    for entity in entities {
                        if self.withdraw_in(&entity, &origin) {
                            touched.insert(entity);
                        }
                    }
                }
                StoreChange::ReplaceOrigin { origin, resources } => {
                    let keep: BTreeSet<EntityId> =
                        resources.iter().map(|r| r.entity.clone()).collect();
                    touched.extend(self.merge(resources));
                    let stale: Vec<EntityId> = self
                        .groups
                        .keys()
                        .filter(|entity| !keep.contains(*entity))
                        .cloned()
                        .collect();
                    for entity in stale {
                        if self.withdraw_in(&entity, &origin) {
                            touched.insert(entity);
                        }
                    }
                }
            }
        }
        touched
    }

    /// Groups resources by entity into the ordered sets. Returns the entities
    /// whose set changed.
    pub fn merge(&mut self, resources: Vec<RegisteredResource>) -> BTreeSet<EntityId> {
        let mut touched = BTreeSet::new();
        for resource in resources {
            let entity = resource.entity.clone();
            let shared = self.group_or_insert(&entity);
            let mut set = write_set(&shared);
            if set.upsert(resource) {
                set.sort(&self.comparator);
                touched.insert(entity);
            }
        }
        touched
    }

    fn withdraw_in(&mut self, entity: &EntityId, origin: &str) -> bool {
        let Some(shared) = self.groups.get(entity) else {
            return false;
        };
        let mut set = write_set(shared);
        let changed = set.withdraw(origin);
        if changed {
            set.sort(&self.comparator);
        }
        changed
    }

    fn group_or_insert(&mut self, entity: &EntityId) -> SharedRegistrations {
        Arc::clone(
            self.groups
                .entry(entity.clone())
                .or_insert_with(|| Arc::new(RwLock::new(EntityRegistrations::new(entity.clone())))),
        )
    }

    /// The registration set of an entity, creating an empty one if unknown.
    pub fn group_or_empty(&mut self, entity: &EntityId) -> SharedRegistrations {
        self.group_or_insert(entity)
    }

    pub fn group(&self, entity: &EntityId) -> Option<SharedRegistrations> {
        self.groups.get(entity).map(Arc::clone)
    }

    /// Snapshot of the grouped table for one cycle.
    pub fn groups(&self) -> &BTreeMap<EntityId, SharedRegistrations> {
        &self.groups
    }

    pub fn remove_group(&mut self, entity: &EntityId) {
        self.groups.remove(entity);
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn describe(&self) -> Vec<EntityDescription> {
        self.groups
            .values()
            .map(|shared| read_set(shared).describe())
            .collect()
    }
}
