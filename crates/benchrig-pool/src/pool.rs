use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use benchrig_model::HardwareMetadata;

use crate::{MetadataCache, PortEnumerator, ValidationConfig};

/// Exclusive hold of one physical port.
#[derive(Debug, Clone)]
pub struct PortAllocation {
    /// Unique, unforgeable handle required to release the hold.
    pub session_id: Uuid,
    pub client_id: String,
    pub port_name: String,
    pub allocated_at: SystemTime,
    /// Score snapshot from the descriptor at allocation time.
    pub validation_score: u8,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub active: usize,
    pub total_allocations: u64,
    pub failed_allocations: u64,
    pub releases: u64,
}

/// Thread-safe exclusive-allocation registry over discovered ports.
///
/// Discovery runs unlocked against the enumerator; only the
/// check-and-insert on the allocation table is serialized, so two
/// concurrent allocators can race for the same candidate but at most one
/// wins it and the loser moves to the next candidate.
pub struct PortPool {
    enumerator: Arc<dyn PortEnumerator>,
    cache: MetadataCache,
    allocations: Mutex<HashMap<String, PortAllocation>>,
    total_allocations: AtomicU64,
    failed_allocations: AtomicU64,
    releases: AtomicU64,
}

impl PortPool {
    pub fn new(enumerator: Arc<dyn PortEnumerator>, cache: MetadataCache) -> Self {
        PortPool {
            enumerator,
            cache,
            allocations: Mutex::new(HashMap::new()),
            total_allocations: AtomicU64::new(0),
            failed_allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Allocates the first discovered port that passes `validation` and is
    /// not already held. Returns `None` when every candidate is filtered
    /// out or taken.
    pub async fn allocate(
        &self,
        validation: &ValidationConfig,
        client_id: &str,
    ) -> Option<PortAllocation> {
        let discovered = self.enumerator.discover().await;
        let candidates: Vec<_> = discovered
            .into_iter()
            .filter(|d| validation.accepts(d))
            .collect();
        self.try_allocate_from(&candidates, client_id, None)
    }

    /// Like [`PortPool::allocate`] but tries `preferred` first when it is
    /// among the candidates.
    pub async fn allocate_preferring(
        &self,
        preferred: Option<&str>,
        validation: &ValidationConfig,
        client_id: &str,
    ) -> Option<PortAllocation> {
        let discovered = self.enumerator.discover().await;
        let candidates: Vec<_> = discovered
            .into_iter()
            .filter(|d| validation.accepts(d))
            .collect();
        self.try_allocate_from(&candidates, client_id, preferred)
    }

    fn try_allocate_from(
        &self,
        candidates: &[benchrig_model::PortDescriptor],
        client_id: &str,
        preferred: Option<&str>,
    ) -> Option<PortAllocation> {
        let ordered: Vec<&benchrig_model::PortDescriptor> = match preferred {
            Some(name) => candidates
                .iter()
                .filter(|d| d.port_name == name)
                .chain(candidates.iter().filter(|d| d.port_name != name))
                .collect(),
            None => candidates.iter().collect(),
        };

        let mut table = self.allocations.lock();
        for descriptor in ordered {
            if table.contains_key(&descriptor.port_name) {
                continue;
            }
            let mut metadata = HashMap::new();
            metadata.insert("chip_family".to_string(), descriptor.chip_family.to_string());
            metadata.insert("is_ftdi".to_string(), descriptor.is_ftdi().to_string());
            metadata.insert(
                "validation_reason".to_string(),
                descriptor.validation_reason.clone(),
            );
            let allocation = PortAllocation {
                session_id: Uuid::new_v4(),
                client_id: client_id.to_string(),
                port_name: descriptor.port_name.clone(),
                allocated_at: SystemTime::now(),
                validation_score: descriptor.validation_score,
                metadata,
            };
            table.insert(descriptor.port_name.clone(), allocation.clone());
            drop(table);
            self.total_allocations.fetch_add(1, Ordering::Relaxed);
            info!(
                port = %allocation.port_name,
                client = %client_id,
                session = %allocation.session_id,
                "port allocated"
            );
            return Some(allocation);
        }
        drop(table);
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
        debug!(client = %client_id, "no allocatable port");
        None
    }

    /// Releases the hold if and only if both the port name and session id
    /// match the active allocation.
    pub fn release(&self, port_name: &str, session_id: Uuid) -> bool {
        let mut table = self.allocations.lock();
        match table.get(port_name) {
            Some(existing) if existing.session_id == session_id => {
                table.remove(port_name);
                drop(table);
                self.releases.fetch_add(1, Ordering::Relaxed);
                info!(port = %port_name, session = %session_id, "port released");
                true
            }
            _ => false,
        }
    }

    pub fn is_allocated(&self, port_name: &str) -> bool {
        self.allocations.lock().contains_key(port_name)
    }

    /// Snapshot of the active allocations.
    pub fn allocations(&self) -> Vec<PortAllocation> {
        self.allocations.lock().values().cloned().collect()
    }

    /// Cached hardware metadata for one port.
    pub async fn get_system_info(
        &self,
        port_name: &str,
        force_refresh: bool,
    ) -> Option<HardwareMetadata> {
        self.enumerator.info(port_name).await?;
        Some(self.cache.get(port_name, force_refresh).await)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.allocations.lock().len(),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}
