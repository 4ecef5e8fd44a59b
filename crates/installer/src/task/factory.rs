//! Task factory: diffs an entity's desired state against the live system.
//!
//! Emits zero or one task per entity. Nothing is emitted when the live state
//! already matches the candidate, which is what makes repeated cycles
//! converge instead of re-applying the same content.

use log::debug;

use super::{Task, TaskKind};
use crate::comparator::SnapshotPolicy;
use crate::host::LiveState;
use crate::resource::{EntityKind, RegisteredResource};
use crate::store::{read_set, EntityRegistrations, SharedRegistrations};

#[derive(Debug, Clone, Default)]
pub struct TaskFactory {
    policy: SnapshotPolicy,
}

impl TaskFactory {
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self { policy }
    }

    pub fn create_tasks(
        &self,
        registrations: &SharedRegistrations,
        live: &LiveState<'_>,
    ) -> Vec<Task> {
        let kind = {
            let set = read_set(registrations);
            self.decide(&set, live)
        };
        kind.map(|kind| Task::new(kind, SharedRegistrations::clone(registrations)))
            .into_iter()
            .collect()
    }

    /// The task kind needed to converge `set`, if any.
    pub fn decide(&self, set: &EntityRegistrations, live: &LiveState<'_>) -> Option<TaskKind> {
        let candidate = set.candidate();
        let decision = match set.entity().kind() {
            EntityKind::Artifact => self.decide_artifact(set, candidate, live),
            EntityKind::Configuration => decide_configuration(set, candidate, live),
        };
        if let Some(kind) = decision {
            debug!("{} needs {}", set.entity(), kind);
        }
        decision
    }

    fn decide_artifact(
        &self,
        set: &EntityRegistrations,
        candidate: Option<&RegisteredResource>,
        live: &LiveState<'_>,
    ) -> Option<TaskKind> {
        let installed = live.artifacts.installed_version(set.entity().name());
        let (candidate, installed) = match (candidate, installed) {
            (None, Some(_)) => return Some(TaskKind::Remove),
            (None, None) => return None,
            (Some(_), None) => return Some(TaskKind::Install),
            (Some(candidate), Some(installed)) => (candidate, installed),
        };

        let version = candidate.version.as_ref()?;
        if *version != installed {
            // Covers downgrades too, when an older version became candidate.
            return Some(TaskKind::Update);
        }
        if !self.policy.is_snapshot(version) {
            return None;
        }

        // Same unstable version: only a changed digest warrants a reinstall,
        // otherwise every rescan of the same snapshot would reinstall it.
        match live.ledger.get(set.entity()) {
            Some(entry) if entry.digest == candidate.digest => None,
            _ => Some(TaskKind::Update),
        }
    }
}

fn decide_configuration(
    set: &EntityRegistrations,
    candidate: Option<&RegisteredResource>,
    live: &LiveState<'_>,
) -> Option<TaskKind> {
    match (candidate, live.configs.get(set.entity().name())) {
        (None, Some(_)) => Some(TaskKind::Remove),
        (None, None) => None,
        (Some(_), None) => Some(TaskKind::Install),
        (Some(candidate), Some(digest)) if digest != candidate.digest => Some(TaskKind::Update),
        (Some(_), Some(_)) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::ResourceComparator;
    use crate::host::{ConfigHost, InMemoryArtifactHost, InMemoryConfigHost};
    use crate::ledger::DigestLedger;
    use crate::resource::{EntityHint, EntityId, PayloadRef, Registration, Version};
    use crate::store::RegistrationStore;

    struct Fixture {
        store: RegistrationStore,
        artifacts: InMemoryArtifactHost,
        configs: InMemoryConfigHost,
        ledger: DigestLedger,
        factory: TaskFactory,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: RegistrationStore::new(ResourceComparator::default()),
                artifacts: InMemoryArtifactHost::new(),
                configs: InMemoryConfigHost::new(),
                ledger: DigestLedger::in_memory(),
                factory: TaskFactory::default(),
            }
        }

        fn register(&mut self, origin: &str, version: &str, priority: i32, payload: &[u8]) {
            let handle = self.store.handle();
            handle
                .register(
                    Registration::new(
                        origin,
                        EntityHint::artifact("foo", version),
                        PayloadRef::bytes(payload.to_vec()),
                    )
                    .with_priority(priority),
                )
                .unwrap();
            self.store.drain();
        }

        fn decide(&self, entity: &EntityId) -> Option<TaskKind> {
            let live = LiveState {
                artifacts: &self.artifacts,
                configs: &self.configs,
                ledger: &self.ledger,
            };
            let shared = self.store.group(entity).unwrap();
            let set = read_set(&shared);
            self.factory.decide(&set, &live)
        }
    }

    fn foo() -> EntityId {
        EntityId::artifact("foo")
    }

    #[test]
    fn test_install_when_not_live() {
        let mut fx = Fixture::new();
        fx.register("a", "1.0", 0, b"A");
        assert_eq!(fx.decide(&foo()), Some(TaskKind::Install));
    }

    #[test]
    fn test_nothing_when_stable_version_live() {
        let mut fx = Fixture::new();
        fx.register("a", "1.0", 0, b"A");
        fx.artifacts.preinstall("foo", Version::new(1, 0, 0), "other");
        assert_eq!(fx.decide(&foo()), None);
    }

    #[test]
    fn test_update_on_version_change_both_directions() {
        let mut fx = Fixture::new();
        fx.register("a", "1.1", 0, b"B");
        fx.artifacts.preinstall("foo", Version::new(1, 0, 0), "A");
        assert_eq!(fx.decide(&foo()), Some(TaskKind::Update));

        let mut fx = Fixture::new();
        fx.register("a", "1.0", 0, b"A");
        fx.artifacts.preinstall("foo", Version::new(2, 0, 0), "Z");
        assert_eq!(fx.decide(&foo()), Some(TaskKind::Update));
    }

    #[test]
    fn test_remove_when_no_candidate() {
        let mut fx = Fixture::new();
        fx.register("a", "1.0", 0, b"A");
        fx.store.handle().withdraw(&foo(), "a");
        fx.store.drain();

        assert_eq!(fx.decide(&foo()), None);
        fx.artifacts.preinstall("foo", Version::new(1, 0, 0), "A");
        assert_eq!(fx.decide(&foo()), Some(TaskKind::Remove));
    }

    #[test]
    fn test_snapshot_digest_guard() {
        let mut fx = Fixture::new();
        fx.register("a", "1.0-SNAPSHOT", 0, b"A");
        let digest = PayloadRef::bytes(b"A".to_vec()).compute_digest().unwrap();
        let version = Version::parse("1.0-SNAPSHOT").unwrap();
        fx.artifacts.preinstall("foo", version.clone(), &digest);

        // Unknown in the ledger: one redundant reinstall.
        assert_eq!(fx.decide(&foo()), Some(TaskKind::Update));

        fx.ledger.put(&foo(), &digest, Some(&version));
        assert_eq!(fx.decide(&foo()), None);

        fx.register("a", "1.0-SNAPSHOT", 0, b"A2");
        assert_eq!(fx.decide(&foo()), Some(TaskKind::Update));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let mut fx = Fixture::new();
        fx.register("b", "1.0", 0, b"B");
        fx.register("a", "1.0", 5, b"A");
        fx.artifacts.preinstall("foo", Version::new(0, 9, 0), "old");
        let first = fx.decide(&foo());
        for _ in 0..5 {
            assert_eq!(fx.decide(&foo()), first);
        }
    }

    #[test]
    fn test_configuration_decisions() {
        let mut fx = Fixture::new();
        let handle = fx.store.handle();
        let entity = handle
            .register(Registration::new(
                "a",
                EntityHint::configuration("org.example"),
                PayloadRef::bytes(b"port=1".to_vec()),
            ))
            .unwrap();
        fx.store.drain();
        assert_eq!(fx.decide(&entity), Some(TaskKind::Install));

        let digest = PayloadRef::bytes(b"port=1".to_vec()).compute_digest().unwrap();
        fx.configs.put("org.example", &PayloadRef::bytes(vec![]), "stale").unwrap();
        assert_eq!(fx.decide(&entity), Some(TaskKind::Update));

        fx.configs.put("org.example", &PayloadRef::bytes(vec![]), &digest).unwrap();
        assert_eq!(fx.decide(&entity), None);

        handle.withdraw(&entity, "a");
        fx.store.drain();
        assert_eq!(fx.decide(&entity), Some(TaskKind::Remove));
    }

    #[test]
    fn test_create_tasks_wraps_decision() {
        let mut fx = Fixture::new();
        fx.register("a", "1.0", 0, b"A");
        let live = LiveState {
            artifacts: &fx.artifacts,
            configs: &fx.configs,
            ledger: &fx.ledger,
        };
        let shared = fx.store.group(&foo()).unwrap();
        let tasks = fx.factory.create_tasks(&shared, &live);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind(), TaskKind::Install);
        assert_eq!(tasks[0].entity(), &foo());
    }
}
