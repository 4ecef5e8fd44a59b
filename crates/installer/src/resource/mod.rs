//! Resource model: entity identity, versions and registered resources.

pub mod entity;
pub mod registered;
pub mod version;

pub use entity::{EntityHint, EntityId, EntityKind};
pub use registered::{ConfigProperties, PayloadRef, RegisteredResource, Registration, ResourceState};
pub use version::{Version, DEFAULT_SNAPSHOT_MARKER};
