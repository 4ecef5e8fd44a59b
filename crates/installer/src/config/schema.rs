use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resource::DEFAULT_SNAPSHOT_MARKER;

pub const CONFIG_VERSION: &str = "1.0";
const LEDGER_DIR: &str = "bundle-installer";
const LEDGER_FILE: &str = "digests.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerConfig {
    pub version: String,
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,
    /// `None` selects the platform data directory.
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    #[serde(default = "default_snapshot_marker")]
    pub snapshot_marker: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_true")]
    pub purge_ledger_on_stop: bool,
}

fn default_cycle_delay_ms() -> u64 {
    250
}

fn default_snapshot_marker() -> String {
    DEFAULT_SNAPSHOT_MARKER.to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            cycle_delay_ms: default_cycle_delay_ms(),
            ledger_path: None,
            snapshot_marker: default_snapshot_marker(),
            event_capacity: default_event_capacity(),
            purge_ledger_on_stop: true,
        }
    }
}

impl InstallerConfig {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    /// The configured ledger file, or `<data_dir>/bundle-installer/digests.json`.
    /// Falls back to the working directory when the platform has no data dir.
    pub fn resolved_ledger_path(&self) -> PathBuf {
        match &self.ledger_path {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(LEDGER_DIR)
                .join(LEDGER_FILE),
        }
    }
}
