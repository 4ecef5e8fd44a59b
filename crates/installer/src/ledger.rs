//! Digest ledger: last applied fingerprint and version per entity.
//!
//! Backed by a JSON file that is rewritten after every successful apply. A
//! missing or unreadable file is never fatal, the ledger then starts empty
//! and the worst outcome is one redundant reinstall.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::resource::{EntityId, Version};

const LEDGER_FORMAT: u32 = 1;

/// What was last durably applied for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub digest: String,
    pub version: Option<Version>,
    pub applied_at: DateTime<Utc>,
}

/// On-disk representation. Unknown fields are ignored and entries that no
/// longer parse are skipped, so older and newer files both load.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerFile {
    #[serde(default)]
    format: u32,
    #[serde(default)]
    entries: BTreeMap<String, StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    applied_at: Option<String>,
}

#[derive(Debug, Default)]
pub struct DigestLedger {
    path: Option<PathBuf>,
    entries: BTreeMap<EntityId, LedgerEntry>,
}

impl DigestLedger {
    /// A ledger that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the ledger at `path`, degrading to an empty ledger if the file is
    /// missing or corrupt. Later saves still go to `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(ledger) => {
                info!(
                    "Loaded digest ledger '{}' ({} entries)",
                    path.display(),
                    ledger.len()
                );
                ledger
            }
            Err(LedgerError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                info!("No digest ledger at '{}', starting empty", path.display());
                Self {
                    path: Some(path),
                    entries: BTreeMap::new(),
                }
            }
            Err(e) => {
                warn!("Ignoring unusable digest ledger: {}", e);
                Self {
                    path: Some(path),
                    entries: BTreeMap::new(),
                }
            }
        }
    }

    /// Strict load, reporting any read or parse problem.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let content = fs::read_to_string(path).map_err(|e| LedgerError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: LedgerFile =
            serde_json::from_str(&content).map_err(|e| LedgerError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        if file.format > LEDGER_FORMAT {
            debug!(
                "Ledger '{}' has newer format {}, reading known fields only",
                path.display(),
                file.format
            );
        }

        let mut entries = BTreeMap::new();
        for (key, stored) in file.entries {
            let Ok(entity) = EntityId::parse(&key) else {
                debug!("Skipping ledger entry with unknown key '{}'", key);
                continue;
            };
            let version = match stored.version.as_deref().map(Version::parse) {
                Some(Ok(version)) => Some(version),
                Some(Err(e)) => {
                    debug!("Skipping ledger entry '{}': {}", key, e);
                    continue;
                }
                None => None,
            };
            let applied_at = stored
                .applied_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            entries.insert(
                entity,
                LedgerEntry {
                    digest: stored.digest,
                    version,
                    applied_at,
                },
            );
        }

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, entity: &EntityId) -> Option<&LedgerEntry> {
        self.entries.get(entity)
    }

    /// Records an applied digest and persists the ledger. Persistence
    /// failures are logged; the in-memory entry is kept regardless.
    pub fn put(&mut self, entity: &EntityId, digest: &str, version: Option<&Version>) {
        self.entries.insert(
            entity.clone(),
            LedgerEntry {
                digest: digest.to_string(),
                version: version.cloned(),
                applied_at: Utc::now(),
            },
        );
        self.persist();
    }

    /// Removes entries for entities not in `keep`. Returns how many were
    /// dropped.
    pub fn purge(&mut self, keep: &BTreeSet<EntityId>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entity, _| keep.contains(entity));
        let removed = before - self.entries.len();
        if removed > 0 {
            info!("Purged {} stale digest ledger entries", removed);
            self.persist();
        }
        removed
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("Digest ledger kept in memory only: {}", e);
        }
    }

    /// Writes the ledger atomically (temp file, then rename).
    pub fn save(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = LedgerFile {
            format: LEDGER_FORMAT,
            entries: self
                .entries
                .iter()
                .map(|(entity, entry)| {
                    (
                        entity.to_string(),
                        StoredEntry {
                            digest: entry.digest.clone(),
                            version: entry.version.as_ref().map(|v| v.to_string()),
                            applied_at: Some(entry.applied_at.to_rfc3339()),
                        },
                    )
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(LedgerError::Serialize)?;

        let write_err = |source: std::io::Error| LedgerError::Write {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }
}
