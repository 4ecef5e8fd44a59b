//! The installer facade: registration API plus the background loop thread.
//!
//! Producers call [`Installer::register`] and friends from any thread; those
//! calls only queue changes. A dedicated loop thread runs one reconciliation
//! cycle, then sleeps for the configured delay or until woken by an urgent
//! request. Stopping lets the cycle in flight finish, then purges the digest
//! ledger against the live system and stops the hosts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::comparator::SnapshotPolicy;
use crate::config::{validate_config, InstallerConfig};
use crate::error::{InstallerError, Result};
use crate::events::{EventBroadcaster, InstallerEvent};
use crate::host::{ArtifactHost, ConfigHost};
use crate::ledger::{DigestLedger, LedgerEntry};
use crate::reconciler::{CycleReport, CycleRequests, LoopState, LoopStateCell, Reconciler};
use crate::resource::{EntityId, Registration};
use crate::stats::{InstallerStats, StatsSnapshot};
use crate::store::{EntityDescription, RegistrationHandle};
use crate::task::TaskKind;

struct LoopThread {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct Installer {
    config: InstallerConfig,
    reconciler: Arc<Mutex<Reconciler>>,
    handle: RegistrationHandle,
    requests: CycleRequests,
    state: Arc<LoopStateCell>,
    events: EventBroadcaster,
    stats: Arc<InstallerStats>,
    artifacts: Arc<dyn ArtifactHost>,
    configs: Arc<dyn ConfigHost>,
    wake_sender: Sender<()>,
    wake_receiver: Receiver<()>,
    running: Mutex<Option<LoopThread>>,
}

fn lock_reconciler(reconciler: &Mutex<Reconciler>) -> MutexGuard<'_, Reconciler> {
    match reconciler.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Reconciler lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Installer {
    /// Creates an installer whose digest ledger lives at the configured path.
    pub fn new(
        config: InstallerConfig,
        artifacts: Arc<dyn ArtifactHost>,
        configs: Arc<dyn ConfigHost>,
    ) -> Result<Self> {
        validate_config(&config)?;
        let ledger = DigestLedger::open(config.resolved_ledger_path());
        Self::with_ledger(config, artifacts, configs, ledger)
    }

    pub fn with_ledger(
        config: InstallerConfig,
        artifacts: Arc<dyn ArtifactHost>,
        configs: Arc<dyn ConfigHost>,
        ledger: DigestLedger,
    ) -> Result<Self> {
        validate_config(&config)?;

        let events = EventBroadcaster::new(config.event_capacity);
        let reconciler = Reconciler::new(
            Arc::clone(&artifacts),
            Arc::clone(&configs),
            ledger,
            SnapshotPolicy::new(config.snapshot_marker.clone()),
        )?
        .with_events(events.clone());

        let handle = reconciler.handle();
        let stats = reconciler.stats();
        let requests = reconciler.requests();
        let state = reconciler.state();
        let (wake_sender, wake_receiver) = bounded(1);

        Ok(Self {
            config,
            reconciler: Arc::new(Mutex::new(reconciler)),
            handle,
            requests,
            state,
            events,
            stats,
            artifacts,
            configs,
            wake_sender,
            wake_receiver,
            running: Mutex::new(None),
        })
    }

    fn running(&self) -> MutexGuard<'_, Option<LoopThread>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Installer state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn reconciler(&self) -> MutexGuard<'_, Reconciler> {
        lock_reconciler(&self.reconciler)
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Producer-side handle that can be moved to other threads.
    pub fn handle(&self) -> RegistrationHandle {
        self.handle.clone()
    }

    /// Queues a registration for the next cycle. Malformed input is rejected
    /// here and never reaches the store.
    pub fn register(&self, registration: Registration) -> Result<EntityId> {
        Ok(self.handle.register(registration)?)
    }

    pub fn withdraw(&self, entity: &EntityId, origin: &str) {
        self.handle.withdraw(entity, origin);
    }

    pub fn withdraw_origin(&self, origin: &str) {
        self.handle.withdraw_origin(origin);
    }

    /// Makes `registrations` everything `origin` declares.
    pub fn replace_origin(
        &self,
        origin: &str,
        registrations: Vec<Registration>,
    ) -> Result<Vec<EntityId>> {
        Ok(self.handle.replace_origin(origin, registrations)?)
    }

    /// Queues a task ahead of the regular diff and wakes the loop.
    pub fn request_task(&self, entity: EntityId, kind: TaskKind) {
        self.requests.request_task(entity, kind);
        self.wake();
    }

    /// Makes the next cycle compare every known entity with the host.
    pub fn rescan(&self) {
        self.requests.request_rescan();
        self.wake();
    }

    fn wake(&self) {
        // A full channel already holds a pending wake-up.
        let _ = self.wake_sender.try_send(());
    }

    /// Runs one cycle on the calling thread. Serialized with the loop thread.
    pub fn run_cycle(&self) -> CycleReport {
        self.reconciler().run_cycle()
    }

    pub fn start(&self) -> Result<()> {
        let mut running = self.running();
        if running.is_some() {
            return Err(InstallerError::AlreadyRunning);
        }

        self.artifacts.start()?;
        if let Err(e) = self.configs.start() {
            self.artifacts.stop();
            return Err(e.into());
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let reconciler = Arc::clone(&self.reconciler);
        let wake = self.wake_receiver.clone();
        let delay = self.config.cycle_delay();

        let spawned = thread::Builder::new()
            .name("installer-loop".to_string())
            .spawn(move || run_loop(reconciler, wake, delay, shutdown_flag));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                self.configs.stop();
                self.artifacts.stop();
                return Err(InstallerError::SpawnFailed {
                    name: "installer-loop".to_string(),
                    source,
                });
            }
        };

        info!("Installer started (cycle delay {:?})", delay);
        *running = Some(LoopThread { shutdown, handle });
        Ok(())
    }

    /// Stops the loop after its current cycle, then purges and saves the
    /// ledger and stops both hosts.
    pub fn stop(&self) -> Result<()> {
        let Some(thread) = self.running().take() else {
            return Err(InstallerError::NotRunning);
        };

        thread.shutdown.store(true, Ordering::Release);
        self.wake();
        if let Err(e) = thread.handle.join() {
            error!("Reconciliation loop panicked: {:?}", e);
        }
        self.state.set(LoopState::Stopped);

        {
            let reconciler = self.reconciler();
            if self.config.purge_ledger_on_stop {
                let removed = reconciler.purge_ledger();
                debug!("Ledger purge on stop removed {} entries", removed);
            } else if let Err(e) = reconciler.ledger().save() {
                warn!("Digest ledger not saved on stop: {}", e);
            }
        }

        self.configs.stop();
        self.artifacts.stop();
        info!("Installer stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    /// Every entity's ordered registration set with per-resource state.
    pub fn describe(&self) -> Vec<EntityDescription> {
        self.reconciler().describe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallerEvent> {
        self.events.subscribe()
    }

    pub fn ledger_entry(&self, entity: &EntityId) -> Option<LedgerEntry> {
        self.reconciler().ledger().get(entity).cloned()
    }

    pub fn pending_retries(&self) -> usize {
        self.reconciler().pending_retries()
    }
}

impl Drop for Installer {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
        self.reconciler().shutdown();
    }
}

fn run_loop(
    reconciler: Arc<Mutex<Reconciler>>,
    wake: Receiver<()>,
    delay: Duration,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Reconciliation loop started");
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        lock_reconciler(&reconciler).run_cycle();

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match wake.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Reconciliation loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryArtifactHost, InMemoryConfigHost};
    use crate::resource::{EntityHint, PayloadRef};

    fn installer(
        artifacts: Arc<InMemoryArtifactHost>,
        configs: Arc<InMemoryConfigHost>,
    ) -> Installer {
        let config = InstallerConfig {
            cycle_delay_ms: 10,
            ..InstallerConfig::default()
        };
        Installer::with_ledger(config, artifacts, configs, DigestLedger::in_memory()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = InstallerConfig {
            cycle_delay_ms: 0,
            ..InstallerConfig::default()
        };
        let result = Installer::with_ledger(
            config,
            Arc::new(InMemoryArtifactHost::new()),
            Arc::new(InMemoryConfigHost::new()),
            DigestLedger::in_memory(),
        );
        assert!(matches!(result, Err(InstallerError::Config(_))));
    }

    #[test]
    fn test_malformed_registration_rejected_synchronously() {
        let installer = installer(
            Arc::new(InMemoryArtifactHost::new()),
            Arc::new(InMemoryConfigHost::new()),
        );
        let result = installer.register(Registration::new(
            "",
            EntityHint::artifact("foo", "1.0"),
            PayloadRef::bytes(b"A".to_vec()),
        ));
        assert!(matches!(result, Err(InstallerError::Registration(_))));
        assert_eq!(installer.stats().registrations, 0);
        assert_eq!(installer.handle().pending_len(), 0);
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let artifacts = Arc::new(InMemoryArtifactHost::new());
        let installer = installer(artifacts.clone(), Arc::new(InMemoryConfigHost::new()));

        assert!(matches!(installer.stop(), Err(InstallerError::NotRunning)));
        installer.start().unwrap();
        assert!(artifacts.is_started());
        assert!(matches!(
            installer.start(),
            Err(InstallerError::AlreadyRunning)
        ));

        installer.stop().unwrap();
        assert!(!installer.is_running());
        assert!(!artifacts.is_started());
        assert_eq!(installer.state(), LoopState::Stopped);
    }

    #[test]
    fn test_manual_cycle_and_describe() {
        let artifacts = Arc::new(InMemoryArtifactHost::new());
        let installer = installer(artifacts.clone(), Arc::new(InMemoryConfigHost::new()));
        let entity = installer
            .register(Registration::new(
                "fs",
                EntityHint::artifact("foo", "1.0"),
                PayloadRef::bytes(b"A".to_vec()),
            ))
            .unwrap();

        let report = installer.run_cycle();
        assert_eq!(report.count(TaskKind::Install), 1);
        assert!(installer.ledger_entry(&entity).is_some());

        let description = installer.describe();
        assert_eq!(description.len(), 1);
        let json = serde_json::to_value(&description[0]).unwrap();
        assert_eq!(json["entity"], "artifact:foo");
        assert_eq!(json["resources"][0]["state"], "installed");
    }
}
