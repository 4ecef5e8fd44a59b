//! Cumulative installer counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct InstallerStats {
    cycles: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_retried: AtomicU64,
    tasks_failed: AtomicU64,
    registrations: AtomicU64,
    withdrawals: AtomicU64,
}

/// Point-in-time copy of [`InstallerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub tasks_executed: u64,
    pub tasks_retried: u64,
    pub tasks_failed: u64,
    pub registrations: u64,
    pub withdrawals: u64,
}

impl InstallerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registrations(&self, count: u64) {
        self.registrations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_withdrawal(&self) {
        self.withdrawals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
        }
    }
}
