use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use benchrig_model::{BibDefinition, Error, PortDefinition};

use crate::{parse_bibs, validate_bibs, validate_limits};

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub reloads: u64,
}

struct StoreEntry {
    fingerprint: String,
    bibs: Arc<Vec<BibDefinition>>,
}

/// Cache of parsed configuration files.
///
/// Entries are keyed by canonical path and guarded by a fingerprint of the
/// path plus the file's modification time: touching the file invalidates
/// the entry on next access. Validation warnings are logged on load;
/// validation errors fail the load.
#[derive(Default)]
pub struct ConfigStore {
    entries: RwLock<HashMap<PathBuf, StoreEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    reloads: AtomicU64,
}

fn fingerprint(path: &Path, mtime: SystemTime) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    let nanos = mtime
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    hasher.update(nanos.to_le_bytes());
    hex::encode(hasher.finalize())
}

impl ConfigStore {
    pub fn new() -> Self {
        ConfigStore::default()
    }

    /// Returns the parsed definition tree for `path`, loading or reloading
    /// the file as needed.
    pub fn get(&self, path: &Path) -> Result<Arc<Vec<BibDefinition>>, Error> {
        let canonical = std::fs::canonicalize(path).map_err(|_| Error::ConfigNotFound {
            path: path.to_path_buf(),
        })?;
        let metadata = std::fs::metadata(&canonical).map_err(|_| Error::ConfigNotFound {
            path: path.to_path_buf(),
        })?;
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let current = fingerprint(&canonical, mtime);

        if let Some(entry) = self.entries.read().get(&canonical) {
            if entry.fingerprint == current {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.bibs.clone());
            }
        }

        let replaced = self.entries.read().contains_key(&canonical);
        if replaced {
            self.reloads.fetch_add(1, Ordering::Relaxed);
            debug!(path = %canonical.display(), "configuration changed on disk, reloading");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let bibs = self.load(&canonical, metadata.len())?;
        let bibs = Arc::new(bibs);
        self.entries.write().insert(
            canonical,
            StoreEntry {
                fingerprint: current,
                bibs: bibs.clone(),
            },
        );
        Ok(bibs)
    }

    fn load(&self, canonical: &Path, file_size: u64) -> Result<Vec<BibDefinition>, Error> {
        let xml = std::fs::read_to_string(canonical).map_err(|err| Error::ConfigInvalid {
            reason: format!("cannot read {}: {err}", canonical.display()),
        })?;
        let parsed = parse_bibs(&xml)?;

        let mut report = validate_bibs(&parsed.bibs);
        validate_limits(file_size, parsed.element_count, parsed.max_depth, &mut report);
        for warning in parsed.warnings.iter().chain(report.warnings.iter()) {
            warn!(path = %canonical.display(), warning, "configuration warning");
        }
        if !report.is_valid() {
            return Err(Error::ConfigInvalid {
                reason: report.errors.join("; "),
            });
        }
        Ok(parsed.bibs)
    }

    pub fn find_bib(&self, path: &Path, bib_id: &str) -> Result<BibDefinition, Error> {
        let bibs = self.get(path)?;
        bibs.iter()
            .find(|b| b.id == bib_id)
            .cloned()
            .ok_or_else(|| Error::BibNotFound {
                bib_id: bib_id.to_string(),
            })
    }

    pub fn find_port(
        &self,
        path: &Path,
        bib_id: &str,
        uut_id: &str,
        port_index: u32,
    ) -> Result<PortDefinition, Error> {
        let bib = self.find_bib(path, bib_id)?;
        let uut = bib.uut(uut_id).ok_or_else(|| Error::UutNotFound {
            bib_id: bib_id.to_string(),
            uut_id: uut_id.to_string(),
        })?;
        uut.port(port_index)
            .cloned()
            .ok_or_else(|| Error::PortNotFound {
                bib_id: bib_id.to_string(),
                uut_id: uut_id.to_string(),
                port_index,
            })
    }

    pub fn invalidate(&self, path: &Path) {
        if let Ok(canonical) = std::fs::canonicalize(path) {
            self.entries.write().remove(&canonical);
        } else {
            self.entries.write().remove(path);
        }
    }

    /// Current counters. Also drops entries whose backing file no longer
    /// exists, so a deleted configuration does not pin its parse forever.
    pub fn stats(&self) -> StoreStats {
        let mut entries = self.entries.write();
        entries.retain(|path, _| path.exists());
        StoreStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }
}
