use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use benchrig_model::HardwareMetadata;

use crate::{EepromReader, PortEnumerator};

#[derive(Debug, Clone, Copy)]
pub struct MetadataCacheConfig {
    pub ttl: Duration,
    pub sweep_period: Duration,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        MetadataCacheConfig {
            ttl: Duration::from_secs(300),
            sweep_period: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

struct CacheEntry {
    metadata: RwLock<HardwareMetadata>,
    expires_at: RwLock<Instant>,
    refreshing: AtomicBool,
    last_accessed: RwLock<Instant>,
    access_count: AtomicU64,
}

impl CacheEntry {
    fn new(metadata: HardwareMetadata, ttl: Duration) -> Self {
        CacheEntry {
            metadata: RwLock::new(metadata),
            expires_at: RwLock::new(Instant::now() + ttl),
            refreshing: AtomicBool::new(false),
            last_accessed: RwLock::new(Instant::now()),
            access_count: AtomicU64::new(0),
        }
    }

    fn store(&self, metadata: HardwareMetadata, ttl: Duration) {
        *self.metadata.write() = metadata;
        *self.expires_at.write() = Instant::now() + ttl;
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= *self.expires_at.read()
    }

    fn touch(&self) {
        *self.last_accessed.write() = Instant::now();
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }
}

struct CacheInner {
    enumerator: Arc<dyn PortEnumerator>,
    eeprom: Arc<dyn EepromReader>,
    config: MetadataCacheConfig,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    token: CancellationToken,
}

/// TTL cache of per-port EEPROM-derived metadata.
///
/// Reads are served from the cache while fresh. An expired entry is served
/// stale while a single background refresh runs for it (the `refreshing`
/// flag is a compare-and-swap gate, so refreshes are single-flight per
/// key). A failed hardware read is cached as an invalid entry rather than
/// surfaced, so `get` never fails.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<CacheInner>,
}

impl MetadataCache {
    pub fn new(
        enumerator: Arc<dyn PortEnumerator>,
        eeprom: Arc<dyn EepromReader>,
        config: MetadataCacheConfig,
    ) -> Self {
        MetadataCache {
            inner: Arc::new(CacheInner {
                enumerator,
                eeprom,
                config,
                entries: RwLock::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                expired: AtomicU64::new(0),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Metadata for `port_name`.
    ///
    /// `force_refresh` bypasses the cache with a synchronous read. An
    /// expired entry is returned stale; the refresh happens in the
    /// background and later callers observe the new value.
    pub async fn get(&self, port_name: &str, force_refresh: bool) -> HardwareMetadata {
        let existing = self.inner.entries.read().get(port_name).cloned();

        let Some(entry) = existing else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            let metadata = self.read_fresh(port_name).await;
            let entry = Arc::new(CacheEntry::new(metadata.clone(), self.inner.config.ttl));
            entry.touch();
            self.inner
                .entries
                .write()
                .insert(port_name.to_string(), entry);
            return metadata;
        };

        entry.touch();

        if force_refresh {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            // Same single-flight gate as the background path: wait out an
            // in-flight refresh instead of racing a second hardware read,
            // then hold the gate for our own synchronous read.
            while entry
                .refreshing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let metadata = self.read_fresh(port_name).await;
            entry.store(metadata.clone(), self.inner.config.ttl);
            entry.refreshing.store(false, Ordering::Release);
            return metadata;
        }

        self.inner.hits.fetch_add(1, Ordering::Relaxed);

        if entry.is_expired()
            && entry
                .refreshing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let cache = self.clone();
            let port = port_name.to_string();
            let entry = entry.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cache.inner.token.cancelled() => {}
                    metadata = cache.read_fresh(&port) => {
                        entry.store(metadata, cache.inner.config.ttl);
                        debug!(port = %port, "background metadata refresh complete");
                    }
                }
                entry.refreshing.store(false, Ordering::Release);
            });
        }

        let metadata = entry.metadata.read().clone();
        metadata
    }

    async fn read_fresh(&self, port_name: &str) -> HardwareMetadata {
        let descriptor = self.inner.enumerator.info(port_name).await;
        let Some(descriptor) = descriptor else {
            warn!(port = %port_name, "enumerator does not know this port");
            return HardwareMetadata::invalid(format!("port '{port_name}' not found"));
        };
        let Some(serial) = descriptor.bridge_serial.clone() else {
            return HardwareMetadata::invalid(format!(
                "port '{port_name}' has no bridge serial number"
            ));
        };

        let data = self.inner.eeprom.read(&serial).await;
        if !data.is_valid {
            let reason = data
                .error
                .unwrap_or_else(|| "EEPROM read failed".to_string());
            warn!(port = %port_name, serial = %serial, reason = %reason, "EEPROM read failed");
            let mut invalid = HardwareMetadata::invalid(reason);
            invalid.serial_number = Some(serial);
            return invalid;
        }

        let eeprom: HashMap<String, String> = data.fields.into_iter().collect();
        HardwareMetadata {
            serial_number: Some(serial),
            manufacturer: data.manufacturer,
            product_description: Some(data.product_description),
            firmware_revision: eeprom.get("firmware_revision").cloned(),
            hardware_revision: eeprom.get("hardware_revision").cloned(),
            eeprom,
            read_at: std::time::SystemTime::now(),
            is_valid: true,
            error: None,
        }
    }

    pub fn invalidate(&self, port_name: &str) {
        self.inner.entries.write().remove(port_name);
    }

    /// Removes expired entries. An entry with a refresh in flight is kept;
    /// the refresh will re-arm its TTL.
    pub fn clear_expired(&self) {
        let mut removed = 0u64;
        self.inner.entries.write().retain(|_, entry| {
            let drop = entry.is_expired() && !entry.refreshing.load(Ordering::Acquire);
            if drop {
                removed += 1;
            }
            !drop
        });
        if removed > 0 {
            self.inner.expired.fetch_add(removed, Ordering::Relaxed);
            debug!(removed, "swept expired metadata entries");
        }
    }

    /// Starts the periodic expiry sweep; stops when the cache shuts down.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cache.inner.token.cancelled() => break,
                    _ = tokio::time::sleep(cache.inner.config.sweep_period) => {
                        cache.clear_expired();
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.entries.read().len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            expired: self.inner.expired.load(Ordering::Relaxed),
        }
    }

    /// Cancels background refreshes and the sweeper.
    pub fn shutdown(&self) {
        self.inner.token.cancel();
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
