//! Test harness for isolated installer runs.
//!
//! Each harness owns a temp directory for the digest ledger and a pair of
//! in-memory hosts. The hosts outlive [`TestHarness::restart`], which makes
//! it possible to simulate a process restart against the same live system.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use bundle_installer::{
    CycleReport, InMemoryArtifactHost, InMemoryConfigHost, Installer, InstallerConfig,
};

use super::builders::ConfigBuilder;

pub struct TestHarness {
    // Dropped before the temp dir it may still write into.
    pub installer: Installer,
    pub artifacts: Arc<InMemoryArtifactHost>,
    pub configs: Arc<InMemoryConfigHost>,
    pub ledger_path: PathBuf,
    config: InstallerConfig,
    temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new())
    }

    /// The ledger path of `builder` is always redirected into the temp dir.
    pub fn with_config(builder: ConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger_path = temp_dir.path().join("state").join("digests.json");
        let config = builder.ledger_path(ledger_path.clone()).build();
        let artifacts = Arc::new(InMemoryArtifactHost::new());
        let configs = Arc::new(InMemoryConfigHost::new());
        let installer = Installer::new(config.clone(), artifacts.clone(), configs.clone())
            .expect("Failed to create installer");

        Self {
            temp_dir,
            ledger_path,
            artifacts,
            configs,
            installer,
            config,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Drops the installer and creates a fresh one over the same hosts and
    /// ledger file, as after a process restart.
    pub fn restart(self) -> Self {
        let TestHarness {
            temp_dir,
            ledger_path,
            artifacts,
            configs,
            installer,
            config,
        } = self;
        drop(installer);

        let installer = Installer::new(config.clone(), artifacts.clone(), configs.clone())
            .expect("Failed to recreate installer");
        Self {
            temp_dir,
            ledger_path,
            artifacts,
            configs,
            installer,
            config,
        }
    }

    pub fn cycle(&self) -> CycleReport {
        self.installer.run_cycle()
    }

    /// Runs cycles until one executes nothing. Returns the reports of the
    /// cycles that did something.
    pub fn converge(&self, max_cycles: usize) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        for _ in 0..max_cycles {
            let report = self.cycle();
            if report.is_quiet() {
                return reports;
            }
            reports.push(report);
        }
        panic!("No convergence within {} cycles", max_cycles);
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
