pub mod comparator;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod host;
pub mod installer;
pub mod ledger;
pub mod reconciler;
pub mod resource;
pub mod stats;
pub mod store;
pub mod task;
pub mod telemetry;

pub use comparator::{ResourceComparator, SnapshotPolicy};
pub use config::{load_config, load_config_from_str, InstallerConfig};
pub use error::{ConfigError, HostError, InstallerError, LedgerError, RegistrationError, Result};
pub use events::{EventBroadcaster, InstallerEvent, InstallerEventKind};
pub use executor::{BatchReport, TaskExecutor};
pub use host::{
    ArtifactHost, ArtifactPayload, ConfigHost, HostLifecycle, InMemoryArtifactHost,
    InMemoryConfigHost, LiveState,
};
pub use installer::Installer;
pub use ledger::{DigestLedger, LedgerEntry};
pub use reconciler::{CycleReport, LoopState, Reconciler, TaskRecord};
pub use resource::{
    EntityHint, EntityId, EntityKind, PayloadRef, RegisteredResource, Registration,
    ResourceState, Version,
};
pub use stats::{InstallerStats, StatsSnapshot};
pub use store::{EntityDescription, RegistrationHandle, RegistrationStore};
pub use task::{Task, TaskContext, TaskFactory, TaskKind, TaskOutcome};
pub use telemetry::init_logging;
