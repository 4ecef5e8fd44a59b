use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registration rejected: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Installer is already running")]
    AlreadyRunning,

    #[error("Installer is not running")]
    NotRunning,

    #[error("Task executor channel closed unexpectedly")]
    ExecutorClosed,

    #[error("Failed to spawn {name} thread: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Malformed input rejected synchronously at registration time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Registration origin must not be empty")]
    EmptyOrigin,

    #[error("Invalid symbolic name '{name}': {reason}")]
    InvalidSymbolicName { name: String, reason: String },

    #[error("Invalid configuration pid '{pid}': {reason}")]
    InvalidPid { pid: String, reason: String },

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Invalid entity id '{0}'")]
    InvalidEntityId(String),

    #[error("Payload '{0}' has no digest and none can be computed")]
    MissingDigest(String),
}

/// Errors reported by the module host collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A subsystem the host needs is not available yet.
    #[error("Required subsystem not ready: {0}")]
    NotReady(String),

    #[error("Host operation failed: {0}")]
    Operation(String),

    #[error("Payload could not be resolved: {0}")]
    Payload(String),
}

impl HostError {
    /// Returns true if the operation should be attempted again in a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HostError::NotReady(_))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to read ledger '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ledger '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write ledger '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, InstallerError>;
