//! Engine configuration.
//!
//! Controls the response cache layer and the bundled in-memory store.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_SECS: u64 = 120;
const DEFAULT_MEMORY_LIMIT: usize = 1024;

/// Cache engine configuration.
///
/// Deserializable so embedding applications can read it from their own
/// settings files; all fields default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the response cache layer.
    pub enabled: bool,
    /// Store-wide TTL (seconds) applied when the matched rule sets none.
    pub default_ttl_secs: u64,
    /// Maximum entries held by the bundled in-memory store.
    pub memory_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl CacheConfig {
    /// The store-wide default TTL as a duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the memory-store limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.default_ttl_secs, 120);
        assert_eq!(config.memory_limit, 1024);
    }

    #[test]
    fn default_ttl_as_duration() {
        let config = CacheConfig {
            default_ttl_secs: 60,
            ..Default::default()
        };
        assert_eq!(config.default_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn memory_limit_clamps_to_min() {
        let config = CacheConfig {
            memory_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_limit_non_zero().get(), 1);
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: CacheConfig = serde_json::from_str(r#"{"default_ttl_secs": 30}"#)
            .expect("partial config should deserialize");
        assert!(config.enabled);
        assert_eq!(config.default_ttl_secs, 30);
        assert_eq!(config.memory_limit, 1024);
    }
}
