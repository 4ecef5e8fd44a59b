//! Entity identity: the convergence target shared by competing registrations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::version::Version;
use crate::error::RegistrationError;

const ARTIFACT_PREFIX: &str = "artifact:";
const CONFIG_PREFIX: &str = "config:";
const FACTORY_SEPARATOR: char = '~';

/// The two kinds of entity the installer converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artifact,
    Configuration,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Artifact => write!(f, "artifact"),
            EntityKind::Configuration => write!(f, "config"),
        }
    }
}

/// Unique key naming one convergence target, e.g. `artifact:org.example.core`
/// or `config:org.example.http~public`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn artifact(symbolic_name: &str) -> Self {
        Self(format!("{}{}", ARTIFACT_PREFIX, symbolic_name))
    }

    pub fn configuration(pid: &str) -> Self {
        Self(format!("{}{}", CONFIG_PREFIX, pid))
    }

    /// Parses the textual form back into an identifier.
    pub fn parse(raw: &str) -> Result<Self, RegistrationError> {
        let valid = match raw.split_once(':') {
            Some(("artifact", name)) => validate_symbolic_name(name).is_ok(),
            Some(("config", pid)) => validate_composite_pid(pid).is_ok(),
            _ => false,
        };
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(RegistrationError::InvalidEntityId(raw.to_string()))
        }
    }

    pub fn kind(&self) -> EntityKind {
        if self.0.starts_with(ARTIFACT_PREFIX) {
            EntityKind::Artifact
        } else {
            EntityKind::Configuration
        }
    }

    /// The symbolic name or composite pid without the kind prefix.
    pub fn name(&self) -> &str {
        match self.kind() {
            EntityKind::Artifact => &self.0[ARTIFACT_PREFIX.len()..],
            EntityKind::Configuration => &self.0[CONFIG_PREFIX.len()..],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = RegistrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// What the caller knows about the content it registers. This is the output
/// of artifact metadata parsing, validated here before anything is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityHint {
    Artifact {
        symbolic_name: String,
        version: String,
    },
    Configuration {
        pid: String,
        /// Set for factory configurations, `pid` is then the instance name.
        factory_pid: Option<String>,
    },
}

impl EntityHint {
    pub fn artifact(symbolic_name: impl Into<String>, version: impl Into<String>) -> Self {
        EntityHint::Artifact {
            symbolic_name: symbolic_name.into(),
            version: version.into(),
        }
    }

    pub fn configuration(pid: impl Into<String>) -> Self {
        EntityHint::Configuration {
            pid: pid.into(),
            factory_pid: None,
        }
    }

    pub fn factory_configuration(factory_pid: impl Into<String>, name: impl Into<String>) -> Self {
        EntityHint::Configuration {
            pid: name.into(),
            factory_pid: Some(factory_pid.into()),
        }
    }

    /// Derives the entity id and version, rejecting malformed identities.
    pub fn resolve(&self) -> Result<(EntityId, Option<Version>), RegistrationError> {
        match self {
            EntityHint::Artifact {
                symbolic_name,
                version,
            } => {
                validate_symbolic_name(symbolic_name)?;
                let version = Version::parse(version)?;
                Ok((EntityId::artifact(symbolic_name), Some(version)))
            }
            EntityHint::Configuration { pid, factory_pid } => {
                validate_pid(pid)?;
                let composite = match factory_pid {
                    Some(factory) => {
                        validate_pid(factory)?;
                        format!("{}{}{}", factory, FACTORY_SEPARATOR, pid)
                    }
                    None => pid.clone(),
                };
                Ok((EntityId::configuration(&composite), None))
            }
        }
    }
}

fn validate_symbolic_name(name: &str) -> Result<(), RegistrationError> {
    let reject = |reason: &str| RegistrationError::InvalidSymbolicName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(reject("symbolic name must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(reject("symbolic name may only contain [A-Za-z0-9._-]"));
    }
    Ok(())
}

fn validate_pid(pid: &str) -> Result<(), RegistrationError> {
    let reject = |reason: &str| RegistrationError::InvalidPid {
        pid: pid.to_string(),
        reason: reason.to_string(),
    };
    if pid.is_empty() {
        return Err(reject("pid must not be empty"));
    }
    if pid.contains(FACTORY_SEPARATOR) {
        return Err(reject("pid must not contain '~'"));
    }
    if pid.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(reject("pid must not contain whitespace"));
    }
    Ok(())
}

fn validate_composite_pid(composite: &str) -> Result<(), RegistrationError> {
    match composite.split_once(FACTORY_SEPARATOR) {
        Some((factory, name)) => {
            validate_pid(factory)?;
            validate_pid(name)
        }
        None => validate_pid(composite),
    }
}
