//! Reconciliation loop cycle: merge inputs, compute tasks, execute them.
//!
//! The [`Reconciler`] owns the grouped registration table, the retry queue
//! and the executor. One call to [`Reconciler::run_cycle`] is one pass of the
//! loop; the background thread in [`crate::installer`] only paces the calls.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use serde::Serialize;
use tracing::info_span;

use crate::comparator::{ResourceComparator, SnapshotPolicy};
use crate::error::InstallerError;
use crate::events::{EventBroadcaster, InstallerEvent};
use crate::executor::TaskExecutor;
use crate::host::{ArtifactHost, ConfigHost, LiveState};
use crate::ledger::DigestLedger;
use crate::resource::{EntityId, EntityKind};
use crate::stats::InstallerStats;
use crate::store::{write_set, EntityDescription, RegistrationHandle, RegistrationStore};
use crate::task::{lock_ledger, Task, TaskContext, TaskFactory, TaskKind, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    Idle,
    MergingInputs,
    ComputingTasks,
    ExecutingTasks,
    Stopped,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopState::MergingInputs,
            2 => LoopState::ComputingTasks,
            3 => LoopState::ExecutingTasks,
            4 => LoopState::Stopped,
            _ => LoopState::Idle,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::MergingInputs => "merging inputs",
            LoopState::ComputingTasks => "computing tasks",
            LoopState::ExecutingTasks => "executing tasks",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Loop state readable from any thread.
#[derive(Debug, Default)]
pub struct LoopStateCell(AtomicU8);

impl LoopStateCell {
    pub fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LoopState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Out-of-band requests consumed at the start of the next cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleRequests {
    urgent: Arc<Mutex<Vec<(EntityId, TaskKind)>>>,
    rescan: Arc<AtomicBool>,
}

impl CycleRequests {
    fn urgent(&self) -> MutexGuard<'_, Vec<(EntityId, TaskKind)>> {
        match self.urgent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Urgent task queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn request_task(&self, entity: EntityId, kind: TaskKind) {
        self.urgent().push((entity, kind));
    }

    /// Makes the next cycle diff every known entity, not just changed ones.
    pub fn request_rescan(&self) {
        self.rescan.store(true, Ordering::Release);
    }

    fn take_urgent(&self) -> Vec<(EntityId, TaskKind)> {
        std::mem::take(&mut *self.urgent())
    }

    fn take_rescan(&self) -> bool {
        self.rescan.swap(false, Ordering::AcqRel)
    }
}

/// What happened to one task in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub entity: EntityId,
    pub kind: TaskKind,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    /// Entities the factory looked at.
    pub examined: usize,
    pub tasks: Vec<TaskRecord>,
    /// Retry tasks carried into the next cycle.
    pub requeued: usize,
    /// Entities dropped from the store after converging to "absent".
    pub dropped: usize,
}

impl CycleReport {
    pub fn count(&self, kind: TaskKind) -> usize {
        self.tasks.iter().filter(|t| t.kind == kind).count()
    }

    pub fn failed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.outcome, TaskOutcome::Failed(_)))
            .count()
    }

    pub fn is_quiet(&self) -> bool {
        self.tasks.is_empty()
    }
}

pub struct Reconciler {
    store: RegistrationStore,
    factory: TaskFactory,
    executor: TaskExecutor,
    artifacts: Arc<dyn ArtifactHost>,
    configs: Arc<dyn ConfigHost>,
    ledger: Arc<Mutex<DigestLedger>>,
    retry_queue: Vec<Task>,
    /// Entities whose batch never reached the executor.
    deferred: BTreeSet<EntityId>,
    requests: CycleRequests,
    state: Arc<LoopStateCell>,
    events: EventBroadcaster,
    stats: Arc<InstallerStats>,
    cycles: u64,
}

impl Reconciler {
    pub fn new(
        artifacts: Arc<dyn ArtifactHost>,
        configs: Arc<dyn ConfigHost>,
        ledger: DigestLedger,
        policy: SnapshotPolicy,
    ) -> Result<Self, InstallerError> {
        let ledger = Arc::new(Mutex::new(ledger));
        let executor = TaskExecutor::new(TaskContext {
            artifacts: Arc::clone(&artifacts),
            configs: Arc::clone(&configs),
            ledger: Arc::clone(&ledger),
        })?;

        let store = RegistrationStore::new(ResourceComparator::new(policy.clone()));
        let stats = store.stats();
        Ok(Self {
            store,
            factory: TaskFactory::new(policy),
            executor,
            artifacts,
            configs,
            ledger,
            retry_queue: Vec::new(),
            deferred: BTreeSet::new(),
            requests: CycleRequests::default(),
            state: Arc::new(LoopStateCell::default()),
            events: EventBroadcaster::default(),
            stats,
            cycles: 0,
        })
    }

    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    pub fn handle(&self) -> RegistrationHandle {
        self.store.handle()
    }

    pub fn requests(&self) -> CycleRequests {
        self.requests.clone()
    }

    pub fn state(&self) -> Arc<LoopStateCell> {
        Arc::clone(&self.state)
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn stats(&self) -> Arc<InstallerStats> {
        Arc::clone(&self.stats)
    }

    pub fn store(&self) -> &RegistrationStore {
        &self.store
    }

    pub fn ledger(&self) -> MutexGuard<'_, DigestLedger> {
        lock_ledger(&self.ledger)
    }

    /// Retry tasks waiting for the next cycle.
    pub fn pending_retries(&self) -> usize {
        self.retry_queue.len()
    }

    pub fn describe(&self) -> Vec<EntityDescription> {
        self.store.describe()
    }

    /// Runs one full cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;
        let _span = info_span!("cycle", cycle).entered();

        self.state.set(LoopState::MergingInputs);
        let mut dirty = self.store.drain();
        dirty.append(&mut self.deferred);
        if self.requests.take_rescan() {
            debug!("Rescanning all {} entities", self.store.len());
            dirty.extend(self.store.groups().keys().cloned());
        }
        let urgent = self.requests.take_urgent();
        let retries = std::mem::take(&mut self.retry_queue);
        dirty.extend(retries.iter().map(|task| task.entity().clone()));

        self.state.set(LoopState::ComputingTasks);
        let mut batch = self.compute_tasks(&dirty);
        for task in retries {
            // The fresh diff supersedes the queued retry; no diff, no retry.
            if !batch.contains_key(task.entity()) {
                debug!("Dropping {} retry for {}: already converged", task.kind(), task.entity());
            }
        }
        let mut urgent_entities = Vec::with_capacity(urgent.len());
        for (entity, kind) in urgent {
            debug!("Urgent {} requested for {}", kind, entity);
            let shared = self.store.group_or_empty(&entity);
            dirty.insert(entity.clone());
            urgent_entities.push(entity.clone());
            batch.insert(entity, Task::new(kind, shared));
        }

        let mut report = CycleReport {
            cycle,
            examined: dirty.len(),
            ..CycleReport::default()
        };

        if !batch.is_empty() {
            self.state.set(LoopState::ExecutingTasks);
            self.execute(batch, &mut report);
        }
        // Urgent tasks bypass the diff; the next cycle diffs those entities again.
        self.deferred.extend(urgent_entities);

        report.dropped = self.drop_absent(&dirty);
        self.stats.record_cycle();
        self.state.set(LoopState::Idle);

        if !report.is_quiet() {
            info!(
                "Cycle {}: {} task(s), {} requeued, {} failed",
                cycle,
                report.tasks.len(),
                report.requeued,
                report.failed()
            );
        }
        report
    }

    fn compute_tasks(&self, dirty: &BTreeSet<EntityId>) -> BTreeMap<EntityId, Task> {
        let ledger = self.ledger();
        let live = LiveState {
            artifacts: &*self.artifacts,
            configs: &*self.configs,
            ledger: &*ledger,
        };

        let mut batch = BTreeMap::new();
        for entity in dirty {
            let Some(shared) = self.store.group(entity) else {
                continue;
            };
            for task in self.factory.create_tasks(&shared, &live) {
                batch.insert(entity.clone(), task);
            }
        }
        batch
    }

    fn execute(&mut self, batch: BTreeMap<EntityId, Task>, report: &mut CycleReport) {
        let entities: Vec<EntityId> = batch.keys().cloned().collect();
        let results = match self.executor.execute_batch(batch.into_values().collect()) {
            Ok(batch_report) => batch_report.results,
            Err(e) => {
                error!("Batch of {} task(s) not executed: {}", entities.len(), e);
                self.deferred.extend(entities);
                return;
            }
        };

        for (task, outcome) in results {
            let version = task
                .candidate()
                .filter(|_| task.kind() != TaskKind::Remove)
                .and_then(|c| c.version.map(|v| v.to_string()));
            self.events.send(InstallerEvent::from_outcome(
                task.entity(),
                task.kind(),
                &outcome,
                version,
            ));

            match &outcome {
                TaskOutcome::Done => self.stats.record_executed(),
                TaskOutcome::RetryLater(_) => {
                    self.stats.record_retried();
                    self.retry_queue.push(task.clone());
                    report.requeued += 1;
                }
                TaskOutcome::Failed(_) => self.stats.record_failed(),
            }
            report.tasks.push(TaskRecord {
                entity: task.entity().clone(),
                kind: task.kind(),
                outcome,
            });
        }
    }

    /// Whether the host currently has the entity.
    fn is_live(&self, entity: &EntityId) -> bool {
        match entity.kind() {
            EntityKind::Artifact => self.artifacts.is_installed(entity.name()),
            EntityKind::Configuration => self.configs.exists(entity.name()),
        }
    }

    /// Compacts the sets examined this cycle and forgets entities that have
    /// nothing installable and nothing live.
    fn drop_absent(&mut self, examined: &BTreeSet<EntityId>) -> usize {
        let pending: BTreeSet<&EntityId> = self.retry_queue.iter().map(|t| t.entity()).collect();
        let mut absent = Vec::new();
        for entity in examined {
            let Some(shared) = self.store.group(entity) else {
                continue;
            };
            let mut set = write_set(&shared);
            set.compact();
            if !set.has_installable() && !pending.contains(entity) && !self.is_live(entity) {
                absent.push(entity.clone());
            }
        }
        for entity in &absent {
            debug!("Dropping {} from the store", entity);
            self.store.remove_group(entity);
        }
        absent.len()
    }

    /// Drops ledger entries for entities the host no longer has, then saves.
    pub fn purge_ledger(&self) -> usize {
        let mut ledger = self.ledger();
        let keep: BTreeSet<EntityId> = ledger
            .entities()
            .filter(|entity| self.is_live(entity))
            .cloned()
            .collect();
        let removed = ledger.purge(&keep);
        if let Err(e) = ledger.save() {
            warn!("Digest ledger not saved on purge: {}", e);
        }
        removed
    }

    pub fn shutdown(&mut self) {
        self.executor.shutdown();
        self.state.set(LoopState::Stopped);
    }
}
