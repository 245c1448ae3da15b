//! Response cache
//!
//! Caches GET payloads by request fingerprint:
//! - **In-process tier**: LRU with a fixed entry budget, checked first
//! - **Durable tiers**: zero or more key/value backends that survive reloads
//!
//! Entries are readable only while `now - created_at <= ttl`. Expiry is
//! checked lazily on every read; a periodic sweep reclaims memory.

pub mod keys;
pub mod tiered;

pub use keys::{normalize_endpoint, CacheKey};
pub use tiered::{CacheEntry, CacheStats, SweepHandle, TieredCache};

use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the in-process tier
    pub max_entries: usize,
    /// TTL used when a request asks for caching without a TTL
    pub default_ttl: Duration,
    /// Interval of the background expiry sweep
    pub sweep_interval: Duration,
    /// Prefix for keys written to durable tiers
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl: Duration::from_secs(300), // 5 minutes
            sweep_interval: Duration::from_secs(60),
            key_prefix: "cache:".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create config from environment or defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_entries = std::env::var("CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_entries);

        let default_ttl_secs = std::env::var("CACHE_DEFAULT_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_ttl.as_secs());

        let sweep_interval_secs = std::env::var("CACHE_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.sweep_interval.as_secs());

        Self {
            max_entries,
            default_ttl: Duration::from_secs(default_ttl_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 500);
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.key_prefix, "cache:");
    }
}
