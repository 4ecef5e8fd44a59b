//! Narrow interfaces to the module host.
//!
//! The installer never talks to the host directly; it goes through
//! [`ArtifactHost`] and [`ConfigHost`]. Hosts must report "required subsystem
//! not ready" as [`HostError::NotReady`] so the operation is retried in a
//! later cycle instead of being dropped.

pub mod memory;

use crate::error::HostError;
use crate::ledger::DigestLedger;
use crate::resource::{PayloadRef, Version};

pub use memory::{HostOperation, InMemoryArtifactHost, InMemoryConfigHost};

/// Explicit start/stop hooks, called by the installer around the loop.
pub trait HostLifecycle {
    fn start(&self) -> Result<(), HostError> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Everything a host needs to apply one artifact.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactPayload<'a> {
    pub symbolic_name: &'a str,
    pub version: &'a Version,
    pub digest: &'a str,
    pub payload: &'a PayloadRef,
}

pub trait ArtifactHost: HostLifecycle + Send + Sync {
    /// Version of the artifact currently live, if any.
    fn installed_version(&self, symbolic_name: &str) -> Option<Version>;

    fn is_installed(&self, symbolic_name: &str) -> bool {
        self.installed_version(symbolic_name).is_some()
    }

    fn install(&self, artifact: &ArtifactPayload<'_>) -> Result<(), HostError>;

    fn update(&self, artifact: &ArtifactPayload<'_>) -> Result<(), HostError>;

    fn remove(&self, symbolic_name: &str) -> Result<(), HostError>;
}

pub trait ConfigHost: HostLifecycle + Send + Sync {
    /// Digest of the live configuration, `None` if it does not exist.
    fn get(&self, pid: &str) -> Option<String>;

    fn exists(&self, pid: &str) -> bool {
        self.get(pid).is_some()
    }

    fn put(&self, pid: &str, properties: &PayloadRef, digest: &str) -> Result<(), HostError>;

    fn remove(&self, pid: &str) -> Result<(), HostError>;
}

/// Read-only view of the live system used to diff desired against actual.
#[derive(Clone, Copy)]
pub struct LiveState<'a> {
    pub artifacts: &'a dyn ArtifactHost,
    pub configs: &'a dyn ConfigHost,
    pub ledger: &'a DigestLedger,
}
