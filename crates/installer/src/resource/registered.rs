//! Registered resources: one source's declaration of desired content.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::entity::{EntityHint, EntityId};
use super::version::Version;
use crate::error::RegistrationError;

/// Key/value settings of a configuration entity.
pub type ConfigProperties = BTreeMap<String, serde_json::Value>;

/// Handle to the actual content, resolved lazily by the host collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadRef {
    /// Artifact bytes held in memory.
    Bytes(Arc<Vec<u8>>),
    /// Configuration settings.
    Properties(ConfigProperties),
    /// Content stored elsewhere (a file path or URL the host knows how to open).
    Location(String),
}

impl PayloadRef {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        PayloadRef::Bytes(Arc::new(data.into()))
    }

    /// Computes a SHA-256 fingerprint when the content is available locally.
    ///
    /// Returns `None` for [`PayloadRef::Location`].
    pub fn compute_digest(&self) -> Option<String> {
        match self {
            PayloadRef::Bytes(data) => Some(sha256_hex(data)),
            PayloadRef::Properties(props) => {
                let canonical = serde_json::to_vec(props).ok()?;
                Some(sha256_hex(&canonical))
            }
            PayloadRef::Location(_) => None,
        }
    }

    /// Short human readable description, used in logs.
    pub fn describe(&self) -> String {
        match self {
            PayloadRef::Bytes(data) => format!("{} bytes", data.len()),
            PayloadRef::Properties(props) => format!("{} properties", props.len()),
            PayloadRef::Location(location) => location.clone(),
        }
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Processing state of a single registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    /// Wants to be installed, not applied yet.
    Install,
    /// Applied and currently the live content of its entity.
    Installed,
    /// Withdrawn, removal not applied yet.
    Uninstall,
    /// Withdrawn and removed from the live system.
    Uninstalled,
    /// Lost to a better candidate.
    Ignored,
}

/// A registration request as submitted by a producer.
#[derive(Debug, Clone)]
pub struct Registration {
    pub origin: String,
    pub hint: EntityHint,
    pub priority: i32,
    pub payload: PayloadRef,
    pub digest: Option<String>,
}

impl Registration {
    pub fn new(origin: impl Into<String>, hint: EntityHint, payload: PayloadRef) -> Self {
        Self {
            origin: origin.into(),
            hint,
            priority: 0,
            payload,
            digest: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Validates the request and turns it into a stored resource.
    pub fn into_resource(self, serial: u64) -> Result<RegisteredResource, RegistrationError> {
        if self.origin.trim().is_empty() {
            return Err(RegistrationError::EmptyOrigin);
        }
        let (entity, version) = self.hint.resolve()?;
        let digest = match self.digest.filter(|d| !d.is_empty()) {
            Some(digest) => digest,
            None => self
                .payload
                .compute_digest()
                .ok_or_else(|| RegistrationError::MissingDigest(self.payload.describe()))?,
        };

        Ok(RegisteredResource {
            entity,
            origin: self.origin,
            priority: self.priority,
            version,
            digest,
            serial,
            installable: true,
            state: ResourceState::Install,
            payload: self.payload,
        })
    }
}

/// One competing declaration for an entity, as held by the registration store.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredResource {
    pub entity: EntityId,
    pub origin: String,
    pub priority: i32,
    pub version: Option<Version>,
    pub digest: String,
    pub serial: u64,
    /// False once the origin no longer wants this entity.
    pub installable: bool,
    pub state: ResourceState,
    pub payload: PayloadRef,
}

impl RegisteredResource {
    /// True if `other` declares the same content with the same weight.
    pub fn same_declaration(&self, other: &RegisteredResource) -> bool {
        self.digest == other.digest
            && self.version == other.version
            && self.priority == other.priority
    }

    pub fn version_label(&self) -> String {
        self.version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_digest_is_stable() {
        let a = PayloadRef::bytes(b"hello".to_vec());
        let b = PayloadRef::bytes(b"hello".to_vec());
        assert_eq!(a.compute_digest(), b.compute_digest());
        assert_eq!(
            a.compute_digest().unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_properties_digest_ignores_insertion_order() {
        let mut first = ConfigProperties::new();
        first.insert("port".to_string(), serde_json::json!(8080));
        first.insert("host".to_string(), serde_json::json!("localhost"));
        let mut second = ConfigProperties::new();
        second.insert("host".to_string(), serde_json::json!("localhost"));
        second.insert("port".to_string(), serde_json::json!(8080));
        assert_eq!(
            PayloadRef::Properties(first).compute_digest(),
            PayloadRef::Properties(second).compute_digest()
        );
    }

    #[test]
    fn test_location_requires_digest() {
        let reg = Registration::new(
            "file",
            EntityHint::artifact("foo", "1.0"),
            PayloadRef::Location("/tmp/foo.jar".to_string()),
        );
        let err = reg.clone().into_resource(1).unwrap_err();
        assert!(matches!(err, RegistrationError::MissingDigest(_)));

        let resource = reg.with_digest("abc").into_resource(1).unwrap();
        assert_eq!(resource.digest, "abc");
        assert!(resource.installable);
        assert_eq!(resource.state, ResourceState::Install);
    }

    #[test]
    fn test_empty_origin_rejected() {
        let reg = Registration::new(
            " ",
            EntityHint::configuration("pid"),
            PayloadRef::bytes(vec![]),
        );
        assert_eq!(reg.into_resource(1).unwrap_err(), RegistrationError::EmptyOrigin);
    }

    #[test]
    fn test_same_declaration() {
        let base = Registration::new(
            "a",
            EntityHint::artifact("foo", "1.0"),
            PayloadRef::bytes(vec![1]),
        )
        .into_resource(1)
        .unwrap();
        let mut other = base.clone();
        other.serial = 7;
        assert!(base.same_declaration(&other));
        other.priority = 5;
        assert!(!base.same_declaration(&other));
    }
}
