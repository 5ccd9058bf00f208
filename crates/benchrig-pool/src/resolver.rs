use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use benchrig_model::is_valid_bib_id;

use crate::MetadataCache;

/// Resolved identity of one physical port within the bench.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub port_name: String,
    pub bib_id: String,
    pub uut_id: String,
    /// 1-based channel ordinal within the UUT.
    pub port_index: u32,
    /// Channel letter decoded from the EEPROM descriptor, empty for
    /// single-channel bridges.
    pub suffix: String,
    /// Whether the default BIB was substituted for a missing or invalid
    /// descriptor.
    pub is_fallback: bool,
}

/// Maps a BIB id and channel suffix to a UUT id.
///
/// The common production setup runs a single UUT per BIB, so the default
/// table maps everything to one configurable id; benches with several UUTs
/// register per-BIB (and per-suffix) overrides.
#[derive(Debug, Clone)]
pub struct UutMapping {
    default_uut: String,
    overrides: HashMap<String, HashMap<String, String>>,
}

impl Default for UutMapping {
    fn default() -> Self {
        UutMapping {
            default_uut: "production_uut".to_string(),
            overrides: HashMap::new(),
        }
    }
}

impl UutMapping {
    pub fn with_default(default_uut: impl Into<String>) -> Self {
        UutMapping {
            default_uut: default_uut.into(),
            overrides: HashMap::new(),
        }
    }

    /// Registers an override for one BIB and suffix (`""` for suffix-less
    /// descriptors).
    pub fn map(mut self, bib_id: &str, suffix: &str, uut_id: &str) -> Self {
        self.overrides
            .entry(bib_id.to_string())
            .or_default()
            .insert(suffix.to_string(), uut_id.to_string());
        self
    }

    pub fn uut_for(&self, bib_id: &str, suffix: &str) -> &str {
        self.overrides
            .get(bib_id)
            .and_then(|by_suffix| by_suffix.get(suffix))
            .map(String::as_str)
            .unwrap_or(&self.default_uut)
    }
}

#[derive(Debug, Clone)]
pub struct BibResolverConfig {
    /// BIB id substituted when the EEPROM is unreadable or its descriptor
    /// fails validation.
    pub default_bib: String,
    pub uut_mapping: UutMapping,
    pub cache_ttl: Duration,
}

impl Default for BibResolverConfig {
    fn default() -> Self {
        BibResolverConfig {
            default_bib: "client_demo".to_string(),
            uut_mapping: UutMapping::default(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverStats {
    pub requests: u64,
    pub eeprom_reads: u64,
    pub fallbacks: u64,
    pub read_errors: u64,
}

/// Resolves a physical port to its `(bib, uut, port_index)` identity from
/// the bridge EEPROM product descriptor.
///
/// Never fails: any unreadable or malformed descriptor resolves to the
/// configured default BIB with port index 1, and the reason is logged.
pub struct BibResolver {
    cache: MetadataCache,
    config: BibResolverConfig,
    mappings: RwLock<HashMap<String, (PortMapping, Instant)>>,
    requests: AtomicU64,
    eeprom_reads: AtomicU64,
    fallbacks: AtomicU64,
    read_errors: AtomicU64,
}

impl BibResolver {
    pub fn new(cache: MetadataCache, config: BibResolverConfig) -> Self {
        BibResolver {
            cache,
            config,
            mappings: RwLock::new(HashMap::new()),
            requests: AtomicU64::new(0),
            eeprom_reads: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
        }
    }

    pub async fn resolve(&self, port_name: &str) -> PortMapping {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if let Some((mapping, cached_at)) = self.mappings.read().get(port_name).cloned() {
            if cached_at.elapsed() < self.config.cache_ttl {
                return mapping;
            }
        }

        let mapping = self.resolve_uncached(port_name).await;
        self.mappings
            .write()
            .insert(port_name.to_string(), (mapping.clone(), Instant::now()));
        mapping
    }

    async fn resolve_uncached(&self, port_name: &str) -> PortMapping {
        let metadata = self.cache.get(port_name, false).await;
        if !metadata.is_valid {
            self.read_errors.fetch_add(1, Ordering::Relaxed);
            debug!(
                port = %port_name,
                error = metadata.error.as_deref().unwrap_or("unknown"),
                "EEPROM unreadable, using default BIB"
            );
            return self.fallback(port_name);
        }
        self.eeprom_reads.fetch_add(1, Ordering::Relaxed);

        let descriptor = metadata
            .product_description
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_string();
        if descriptor.is_empty() {
            return self.fallback(port_name);
        }

        let (bib_id, suffix) = split_descriptor(&descriptor);

        if !is_valid_bib_id(&bib_id) {
            warn!(port = %port_name, bib = %bib_id, "invalid BIB id in EEPROM descriptor");
            return self.fallback(port_name);
        }

        // Only A..D split off as suffixes, so this is total.
        let port_index = match suffix.as_str() {
            "B" => 2,
            "C" => 3,
            "D" => 4,
            _ => 1,
        };

        let uut_id = self
            .config
            .uut_mapping
            .uut_for(&bib_id, &suffix)
            .to_string();

        PortMapping {
            port_name: port_name.to_string(),
            bib_id,
            uut_id,
            port_index,
            suffix,
            is_fallback: false,
        }
    }

    fn fallback(&self, port_name: &str) -> PortMapping {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        PortMapping {
            port_name: port_name.to_string(),
            bib_id: self.config.default_bib.clone(),
            uut_id: self
                .config
                .uut_mapping
                .uut_for(&self.config.default_bib, "")
                .to_string(),
            port_index: 1,
            suffix: String::new(),
            is_fallback: true,
        }
    }

    pub fn invalidate(&self, port_name: &str) {
        self.mappings.write().remove(port_name);
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            requests: self.requests.load(Ordering::Relaxed),
            eeprom_reads: self.eeprom_reads.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

/// Splits a product descriptor into BIB id and channel suffix: a trailing
/// whitespace-separated single capital in `A..D` is the suffix, anything
/// else is part of the id.
fn split_descriptor(descriptor: &str) -> (String, String) {
    if let Some((head, tail)) = descriptor.rsplit_once(char::is_whitespace) {
        if tail.len() == 1 && matches!(tail, "A" | "B" | "C" | "D") {
            return (head.trim_end().to_string(), tail.to_string());
        }
    }
    (descriptor.to_string(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_without_suffix() {
        assert_eq!(
            split_descriptor("client_demo"),
            ("client_demo".into(), String::new())
        );
    }

    #[test]
    fn descriptor_with_channel_letter() {
        assert_eq!(
            split_descriptor("client_demo B"),
            ("client_demo".into(), "B".into())
        );
    }

    #[test]
    fn non_channel_tail_stays_in_the_id() {
        // 'E' is not a channel letter; the whole string is the id.
        assert_eq!(
            split_descriptor("client_demo E"),
            ("client_demo E".into(), String::new())
        );
        // Lowercase letters are not channel suffixes either.
        assert_eq!(
            split_descriptor("client_demo b"),
            ("client_demo b".into(), String::new())
        );
    }

    #[test]
    fn uut_mapping_default_and_overrides() {
        let mapping = UutMapping::default();
        assert_eq!(mapping.uut_for("any_bib", "A"), "production_uut");

        let mapping = UutMapping::with_default("main_uut").map("bench_x", "B", "aux_uut");
        assert_eq!(mapping.uut_for("bench_x", "B"), "aux_uut");
        assert_eq!(mapping.uut_for("bench_x", "A"), "main_uut");
        assert_eq!(mapping.uut_for("other", "B"), "main_uut");
    }
}
