//! In-memory hosts for embedding and tests.
//!
//! Both hosts record every mutating call and can be told to report
//! [`HostError::NotReady`] or to fail hard for specific names.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::warn;

use super::{ArtifactHost, ArtifactPayload, ConfigHost, HostLifecycle};
use crate::error::HostError;
use crate::resource::{PayloadRef, Version};

/// One mutating call observed by an in-memory host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOperation {
    Install { name: String, version: Version },
    Update { name: String, version: Version },
    Remove { name: String },
    PutConfig { pid: String, digest: String },
    RemoveConfig { pid: String },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("In-memory host lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Failure injection shared by both hosts.
#[derive(Debug, Default)]
struct Faults {
    not_ready_calls: AtomicU32,
    broken: Mutex<BTreeSet<String>>,
}

impl Faults {
    fn check(&self, name: &str) -> Result<(), HostError> {
        let pending = self
            .not_ready_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(HostError::NotReady("package wiring admin".to_string()));
        }
        if lock(&self.broken).contains(name) {
            return Err(HostError::Operation(format!("'{}' is broken", name)));
        }
        Ok(())
    }
}

/// An artifact as held by [`InMemoryArtifactHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    pub version: Version,
    pub digest: String,
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactHost {
    installed: Mutex<BTreeMap<String, InstalledArtifact>>,
    operations: Mutex<Vec<HostOperation>>,
    faults: Faults,
    started: AtomicBool,
}

impl InMemoryArtifactHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts an artifact in place without recording an operation.
    pub fn preinstall(&self, name: &str, version: Version, digest: &str) {
        lock(&self.installed).insert(
            name.to_string(),
            InstalledArtifact {
                version,
                digest: digest.to_string(),
            },
        );
    }

    /// The next `calls` mutating calls report the host as not ready.
    pub fn set_not_ready(&self, calls: u32) {
        self.faults.not_ready_calls.store(calls, Ordering::SeqCst);
    }

    /// Every mutating call for `name` fails hard until [`Self::repair`].
    pub fn break_artifact(&self, name: &str) {
        lock(&self.faults.broken).insert(name.to_string());
    }

    pub fn repair(&self, name: &str) {
        lock(&self.faults.broken).remove(name);
    }

    pub fn installed(&self, name: &str) -> Option<InstalledArtifact> {
        lock(&self.installed).get(name).cloned()
    }

    pub fn operations(&self) -> Vec<HostOperation> {
        lock(&self.operations).clone()
    }

    pub fn clear_operations(&self) {
        lock(&self.operations).clear();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn apply(
        &self,
        artifact: &ArtifactPayload<'_>,
        operation: HostOperation,
    ) -> Result<(), HostError> {
        self.faults.check(artifact.symbolic_name)?;
        lock(&self.installed).insert(
            artifact.symbolic_name.to_string(),
            InstalledArtifact {
                version: artifact.version.clone(),
                digest: artifact.digest.to_string(),
            },
        );
        lock(&self.operations).push(operation);
        Ok(())
    }
}

impl HostLifecycle for InMemoryArtifactHost {
    fn start(&self) -> Result<(), HostError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }
}

impl ArtifactHost for InMemoryArtifactHost {
    fn installed_version(&self, symbolic_name: &str) -> Option<Version> {
        lock(&self.installed)
            .get(symbolic_name)
            .map(|a| a.version.clone())
    }

    fn install(&self, artifact: &ArtifactPayload<'_>) -> Result<(), HostError> {
        self.apply(
            artifact,
            HostOperation::Install {
                name: artifact.symbolic_name.to_string(),
                version: artifact.version.clone(),
            },
        )
    }

    fn update(&self, artifact: &ArtifactPayload<'_>) -> Result<(), HostError> {
        if !self.is_installed(artifact.symbolic_name) {
            return Err(HostError::Operation(format!(
                "cannot update '{}': not installed",
                artifact.symbolic_name
            )));
        }
        self.apply(
            artifact,
            HostOperation::Update {
                name: artifact.symbolic_name.to_string(),
                version: artifact.version.clone(),
            },
        )
    }

    fn remove(&self, symbolic_name: &str) -> Result<(), HostError> {
        self.faults.check(symbolic_name)?;
        lock(&self.installed).remove(symbolic_name);
        lock(&self.operations).push(HostOperation::Remove {
            name: symbolic_name.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConfigHost {
    configs: Mutex<BTreeMap<String, (String, PayloadRef)>>,
    operations: Mutex<Vec<HostOperation>>,
    faults: Faults,
}

impl InMemoryConfigHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_not_ready(&self, calls: u32) {
        self.faults.not_ready_calls.store(calls, Ordering::SeqCst);
    }

    pub fn break_pid(&self, pid: &str) {
        lock(&self.faults.broken).insert(pid.to_string());
    }

    /// The stored properties of a configuration.
    pub fn properties(&self, pid: &str) -> Option<PayloadRef> {
        lock(&self.configs).get(pid).map(|(_, p)| p.clone())
    }

    pub fn operations(&self) -> Vec<HostOperation> {
        lock(&self.operations).clone()
    }
}

impl HostLifecycle for InMemoryConfigHost {}

impl ConfigHost for InMemoryConfigHost {
    fn get(&self, pid: &str) -> Option<String> {
        lock(&self.configs).get(pid).map(|(digest, _)| digest.clone())
    }

    fn put(&self, pid: &str, properties: &PayloadRef, digest: &str) -> Result<(), HostError> {
        self.faults.check(pid)?;
        lock(&self.configs).insert(pid.to_string(), (digest.to_string(), properties.clone()));
        lock(&self.operations).push(HostOperation::PutConfig {
            pid: pid.to_string(),
            digest: digest.to_string(),
        });
        Ok(())
    }

    fn remove(&self, pid: &str) -> Result<(), HostError> {
        self.faults.check(pid)?;
        lock(&self.configs).remove(pid);
        lock(&self.operations).push(HostOperation::RemoveConfig {
            pid: pid.to_string(),
        });
        Ok(())
    }
}
