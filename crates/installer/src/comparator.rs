//! Total order over competing registrations of one entity.
//!
//! The first installable resource in this order is the candidate.
//!
//! Artifacts: symbolic name, then version (newest first), then priority
//! (highest first). For unstable versions the most recent registration wins
//! next, so repeated pushes of the same snapshot replace each other.
//! Configurations: composite pid, then priority (highest first).
//! Both end on origin and serial number so the order is total.

use std::cmp::Ordering;

use crate::resource::{EntityKind, RegisteredResource, Version, DEFAULT_SNAPSHOT_MARKER};

/// Decides which versions count as unstable builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPolicy {
    marker: String,
}

impl SnapshotPolicy {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn is_snapshot(&self, version: &Version) -> bool {
        version.is_snapshot(&self.marker)
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_MARKER)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceComparator {
    policy: SnapshotPolicy,
}

impl ResourceComparator {
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    pub fn compare(&self, a: &RegisteredResource, b: &RegisteredResource) -> Ordering {
        let primary = a
            .entity
            .kind()
            .cmp(&b.entity.kind())
            .then_with(|| a.entity.name().cmp(b.entity.name()));
        if primary != Ordering::Equal {
            return primary;
        }

        let specific = match a.entity.kind() {
            EntityKind::Artifact => self.compare_artifacts(a, b),
            EntityKind::Configuration => b.priority.cmp(&a.priority),
        };

        specific
            .then_with(|| a.origin.cmp(&b.origin))
            .then_with(|| b.serial.cmp(&a.serial))
    }

    fn compare_artifacts(&self, a: &RegisteredResource, b: &RegisteredResource) -> Ordering {
        let by_version = b.version.cmp(&a.version);
        if by_version != Ordering::Equal {
            return by_version;
        }
        let by_priority = b.priority.cmp(&a.priority);
        if by_priority != Ordering::Equal {
            return by_priority;
        }
        match &a.version {
            Some(version) if self.policy.is_snapshot(version) => b.serial.cmp(&a.serial),
            _ => Ordering::Equal,
        }
    }

    /// Sorts a registration set into candidate order.
    pub fn sort(&self, resources: &mut [RegisteredResource]) {
        resources.sort_by(|a, b| self.compare(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{EntityHint, PayloadRef, Registration};

    fn artifact(origin: &str, version: &str, priority: i32, serial: u64) -> RegisteredResource {
        Registration::new(origin, EntityHint::artifact("foo", version), PayloadRef::bytes(vec![]))
            .with_priority(priority)
            .into_resource(serial)
            .unwrap()
    }

    fn config(origin: &str, priority: i32, serial: u64) -> RegisteredResource {
        Registration::new(origin, EntityHint::configuration("pid"), PayloadRef::bytes(vec![]))
            .with_priority(priority)
            .into_resource(serial)
            .unwrap()
    }

    #[test]
    fn test_newer_version_wins_over_priority() {
        let cmp = ResourceComparator::default();
        let old_high = artifact("a", "1.0", 100, 1);
        let new_low = artifact("b", "1.1", 0, 2);
        assert_eq!(cmp.compare(&new_low, &old_high), Ordering::Less);
    }

    #[test]
    fn test_priority_breaks_version_tie() {
        let cmp = ResourceComparator::default();
        let low = artifact("a", "1.0", 0, 2);
        let high = artifact("b", "1.0", 10, 1);
        let mut set = vec![low, high];
        cmp.sort(&mut set);
        assert_eq!(set[0].origin, "b");
    }

    #[test]
    fn test_snapshot_recency() {
        let cmp = ResourceComparator::default();
        let first = artifact("b", "1.0-SNAPSHOT", 0, 1);
        let second = artifact("a", "1.0-SNAPSHOT", 0, 2);
        let mut set = vec![first, second];
        cmp.sort(&mut set);
        assert_eq!(set[0].serial, 2);
    }

    #[test]
    fn test_stable_tie_is_not_recency_based() {
        let cmp = ResourceComparator::default();
        let first = artifact("a", "1.0", 0, 1);
        let second = artifact("b", "1.0", 0, 2);
        let mut set = vec![second, first];
        cmp.sort(&mut set);
        assert_eq!(set[0].origin, "a");
    }

    #[test]
    fn test_custom_marker() {
        let cmp = ResourceComparator::new(SnapshotPolicy::new("DEV"));
        let first = artifact("b", "2.0.0.DEV", 0, 1);
        let second = artifact("a", "2.0.0.DEV", 0, 9);
        assert_eq!(cmp.compare(&second, &first), Ordering::Less);

        let default = ResourceComparator::default();
        assert_eq!(default.compare(&first, &second), Ordering::Greater);
    }

    #[test]
    fn test_configuration_priority() {
        let cmp = ResourceComparator::default();
        let low = config("a", 1, 1);
        let high = config("b", 5, 2);
        assert_eq!(cmp.compare(&high, &low), Ordering::Less);
    }

    #[test]
    fn test_order_is_deterministic() {
        let cmp = ResourceComparator::default();
        let resources = vec![
            artifact("c", "1.0", 0, 3),
            artifact("a", "1.0", 0, 1),
            artifact("b", "1.1", -1, 2),
        ];
        let mut forward = resources.clone();
        let mut backward: Vec<_> = resources.into_iter().rev().collect();
        cmp.sort(&mut forward);
        cmp.sort(&mut backward);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].origin, "b");
    }
}
