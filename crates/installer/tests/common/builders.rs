//! Builders for registrations and configs used across integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use bundle_installer::resource::ConfigProperties;
use bundle_installer::{EntityHint, InstallerConfig, PayloadRef, Registration};

/// Builder for artifact registrations.
pub struct ArtifactBuilder {
    name: String,
    version: String,
    origin: String,
    priority: i32,
    payload: Vec<u8>,
    digest: Option<String>,
}

impl ArtifactBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            origin: "test".to_string(),
            priority: 0,
            payload: format!("{}-{}", name, version).into_bytes(),
            digest: None,
        }
    }

    pub fn origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Content of the artifact; the digest is derived from it.
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn digest(mut self, digest: &str) -> Self {
        self.digest = Some(digest.to_string());
        self
    }

    pub fn build(self) -> Registration {
        let registration = Registration::new(
            self.origin,
            EntityHint::artifact(self.name, self.version),
            PayloadRef::bytes(self.payload),
        )
        .with_priority(self.priority);
        match self.digest {
            Some(digest) => registration.with_digest(digest),
            None => registration,
        }
    }
}

/// Builder for configuration registrations.
pub struct ConfigurationBuilder {
    pid: String,
    factory_pid: Option<String>,
    origin: String,
    priority: i32,
    properties: ConfigProperties,
}

impl ConfigurationBuilder {
    pub fn new(pid: &str) -> Self {
        Self {
            pid: pid.to_string(),
            factory_pid: None,
            origin: "test".to_string(),
            priority: 0,
            properties: ConfigProperties::new(),
        }
    }

    /// A factory configuration instance named `name`.
    pub fn factory(factory_pid: &str, name: &str) -> Self {
        let mut builder = Self::new(name);
        builder.factory_pid = Some(factory_pid.to_string());
        builder
    }

    pub fn origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Registration {
        let hint = match self.factory_pid {
            Some(factory_pid) => EntityHint::factory_configuration(factory_pid, self.pid),
            None => EntityHint::configuration(self.pid),
        };
        Registration::new(self.origin, hint, PayloadRef::Properties(self.properties))
            .with_priority(self.priority)
    }
}

/// Builder for `InstallerConfig` instances.
pub struct ConfigBuilder {
    config: InstallerConfig,
}

impl ConfigBuilder {
    /// Defaults suited to tests: short cycle delay.
    pub fn new() -> Self {
        Self {
            config: InstallerConfig {
                cycle_delay_ms: 10,
                ..InstallerConfig::default()
            },
        }
    }

    pub fn cycle_delay_ms(mut self, delay: u64) -> Self {
        self.config.cycle_delay_ms = delay;
        self
    }

    pub fn snapshot_marker(mut self, marker: &str) -> Self {
        self.config.snapshot_marker = marker.to_string();
        self
    }

    pub fn purge_ledger_on_stop(mut self, purge: bool) -> Self {
        self.config.purge_ledger_on_stop = purge;
        self
    }

    pub fn ledger_path(mut self, path: PathBuf) -> Self {
        self.config.ledger_path = Some(path);
        self
    }

    pub fn build(self) -> InstallerConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
