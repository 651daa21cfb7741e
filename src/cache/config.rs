//! Preview cache configuration.

use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_TENANT_QUOTA_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_EVICTION_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Lifetime of an entry from the moment it is stored.
    pub ttl: Duration,
    /// Per-tenant byte budget before eviction kicks in.
    pub tenant_quota_bytes: u64,
    /// Share of the tenant's entries dropped, oldest first, once over quota.
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_TTL,
            tenant_quota_bytes: DEFAULT_TENANT_QUOTA_BYTES,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.ttl,
            tenant_quota_bytes: settings.tenant_quota_bytes,
            eviction_fraction: settings.eviction_fraction,
        }
    }
}

impl CacheConfig {
    /// Number of entries to evict out of `total`, at least one.
    pub fn eviction_count(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        let fraction = self.eviction_fraction.clamp(0.0, 1.0);
        let count = (total as f64 * fraction).ceil() as usize;
        count.clamp(1, total)
    }
}
