//! Response cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_TTL_SECS: u64 = 5 * 60;
const DEFAULT_METADATA_TTL_SECS: u64 = 30 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used by plain cached reads.
    pub default_ttl: Duration,
    /// TTL for slow-changing metadata endpoints.
    pub metadata_ttl: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Upper bound on stored entries; least recently used entries are evicted first.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            metadata_ttl: Duration::from_secs(DEFAULT_METADATA_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl: settings.default_ttl,
            metadata_ttl: settings.metadata_ttl,
            sweep_interval: settings.sweep_interval,
            max_entries: settings.max_entries.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
