//! State-changing tasks and the factory that derives them.

pub mod factory;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::error::HostError;
use crate::host::{ArtifactHost, ArtifactPayload, ConfigHost};
use crate::ledger::DigestLedger;
use crate::resource::{EntityId, EntityKind, RegisteredResource};
use crate::store::{read_set, write_set, SharedRegistrations};

pub use factory::TaskFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Install,
    Update,
    Remove,
}

impl TaskKind {
    /// Position of the step among the tasks of one entity.
    fn step(self) -> u8 {
        match self {
            TaskKind::Remove => 0,
            TaskKind::Update => 1,
            TaskKind::Install => 2,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Install => write!(f, "install"),
            TaskKind::Update => write!(f, "update"),
            TaskKind::Remove => write!(f, "remove"),
        }
    }
}

/// Result of executing one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    /// A dependency of the host is not available yet; run again next cycle.
    RetryLater(String),
    /// Hard failure; the task is dropped.
    Failed(String),
}

impl From<HostError> for TaskOutcome {
    fn from(err: HostError) -> Self {
        if err.is_retryable() {
            TaskOutcome::RetryLater(err.to_string())
        } else {
            TaskOutcome::Failed(err.to_string())
        }
    }
}

/// Collaborators a task needs to run, owned by the executor worker.
#[derive(Clone)]
pub struct TaskContext {
    pub artifacts: Arc<dyn ArtifactHost>,
    pub configs: Arc<dyn ConfigHost>,
    pub ledger: Arc<Mutex<DigestLedger>>,
}

impl TaskContext {
    pub fn ledger(&self) -> MutexGuard<'_, DigestLedger> {
        lock_ledger(&self.ledger)
    }
}

pub(crate) fn lock_ledger(ledger: &Mutex<DigestLedger>) -> MutexGuard<'_, DigestLedger> {
    match ledger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Digest ledger lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Computes the ordering key. Configurations run before artifacts, and all
/// steps for one entity share a prefix so they stay adjacent.
pub fn sort_key(entity: &EntityId, kind: TaskKind) -> String {
    let group = match entity.kind() {
        EntityKind::Configuration => 10,
        EntityKind::Artifact => 20,
    };
    format!("{:02}-{}-{}", group, entity.name(), kind.step())
}

/// One install, update or remove operation for one entity.
///
/// The task keeps a handle on the entity's registration set instead of a
/// copy of the candidate, so execution always applies the latest winner.
#[derive(Debug, Clone)]
pub struct Task {
    entity: EntityId,
    kind: TaskKind,
    sort_key: String,
    registrations: SharedRegistrations,
}

impl Task {
    pub fn new(kind: TaskKind, registrations: SharedRegistrations) -> Self {
        let entity = read_set(&registrations).entity().clone();
        let sort_key = sort_key(&entity, kind);
        Self {
            entity,
            kind,
            sort_key,
            registrations,
        }
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    pub fn registrations(&self) -> &SharedRegistrations {
        &self.registrations
    }

    /// The candidate as of now, if any.
    pub fn candidate(&self) -> Option<RegisteredResource> {
        read_set(&self.registrations).candidate().cloned()
    }

    /// Applies the task. Ledger entries are written only after the host
    /// call succeeded, so a crash in between causes one harmless repeat.
    pub fn execute(&self, ctx: &TaskContext) -> TaskOutcome {
        let _span = info_span!("task", entity = %self.entity, kind = %self.kind).entered();
        match (self.entity.kind(), self.kind) {
            (EntityKind::Artifact, TaskKind::Remove) => self.remove_artifact(ctx),
            (EntityKind::Artifact, _) => self.apply_artifact(ctx),
            (EntityKind::Configuration, TaskKind::Remove) => self.remove_configuration(ctx),
            (EntityKind::Configuration, _) => self.apply_configuration(ctx),
        }
    }

    fn apply_artifact(&self, ctx: &TaskContext) -> TaskOutcome {
        let Some(candidate) = self.candidate() else {
            debug!("{} has no candidate anymore, skipping {}", self.entity, self.kind);
            return TaskOutcome::Done;
        };
        let Some(version) = candidate.version.as_ref() else {
            return TaskOutcome::Failed(format!("{} has no version", self.entity));
        };

        let name = self.entity.name();
        let artifact = ArtifactPayload {
            symbolic_name: name,
            version,
            digest: &candidate.digest,
            payload: &candidate.payload,
        };
        // A repeat after a crash may find the host already in the target state.
        let result = if ctx.artifacts.is_installed(name) {
            ctx.artifacts.update(&artifact)
        } else {
            ctx.artifacts.install(&artifact)
        };
        if let Err(e) = result {
            return e.into();
        }

        ctx.ledger()
            .put(&self.entity, &candidate.digest, candidate.version.as_ref());
        write_set(&self.registrations).mark_applied(Some(candidate.serial));
        TaskOutcome::Done
    }

    fn remove_artifact(&self, ctx: &TaskContext) -> TaskOutcome {
        let name = self.entity.name();
        if ctx.artifacts.is_installed(name) {
            if let Err(e) = ctx.artifacts.remove(name) {
                return e.into();
            }
        } else {
            debug!("{} is already gone", self.entity);
        }
        write_set(&self.registrations).mark_applied(None);
        TaskOutcome::Done
    }

    fn apply_configuration(&self, ctx: &TaskContext) -> TaskOutcome {
        let Some(candidate) = self.candidate() else {
            debug!("{} has no candidate anymore, skipping {}", self.entity, self.kind);
            return TaskOutcome::Done;
        };
        if let Err(e) = ctx
            .configs
            .put(self.entity.name(), &candidate.payload, &candidate.digest)
        {
            return e.into();
        }

        ctx.ledger().put(&self.entity, &candidate.digest, None);
        write_set(&self.registrations).mark_applied(Some(candidate.serial));
        TaskOutcome::Done
    }

    fn remove_configuration(&self, ctx: &TaskContext) -> TaskOutcome {
        let pid = self.entity.name();
        if ctx.configs.exists(pid) {
            if let Err(e) = ctx.configs.remove(pid) {
                return e.into();
            }
        }
        write_set(&self.registrations).mark_applied(None);
        TaskOutcome::Done
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.entity)
    }
}
