//! Cache configuration.
//!
//! Resolved from the `[cache]` section of `pressroom.toml`; see
//! [`crate::config::CacheSettings`] for validation.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

/// Defaults shared by [`CacheConfig::default`] and the settings loader.
pub mod defaults {
    pub const NAMESPACE: &str = "pressroom";
    pub const LIST_TTL_SECS: u64 = 60;
    pub const DETAIL_TTL_SECS: u64 = 300;
    pub const COOLDOWN_MS: u64 = 5_000;
    pub const OP_TIMEOUT_MS: u64 = 2_000;
    pub const MEMORY_CAPACITY: usize = 10_000;
    /// Longest lifetime any entry may be given: 30 days.
    pub const MAX_TTL_SECS: u64 = 30 * 24 * 60 * 60;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve reads through the cache. When off, every read is a bypass.
    pub enabled: bool,
    /// Prefix applied to every key so several deployments can share a backend.
    pub namespace: String,
    /// Lifetime of list entries. Shorter than `detail_ttl_secs`.
    pub list_ttl_secs: u64,
    /// Lifetime of single-article entries.
    pub detail_ttl_secs: u64,
    /// How long the adapter skips the backend after a failure.
    pub cooldown_ms: u64,
    /// Deadline for a single backend call.
    pub op_timeout_ms: u64,
    /// Entry limit of the in-process backend.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: defaults::NAMESPACE.to_string(),
            list_ttl_secs: defaults::LIST_TTL_SECS,
            detail_ttl_secs: defaults::DETAIL_TTL_SECS,
            cooldown_ms: defaults::COOLDOWN_MS,
            op_timeout_ms: defaults::OP_TIMEOUT_MS,
            memory_capacity: defaults::MEMORY_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            namespace: settings.namespace.clone(),
            list_ttl_secs: settings.list_ttl.as_secs(),
            detail_ttl_secs: settings.detail_ttl.as_secs(),
            cooldown_ms: duration_ms(settings.cooldown),
            op_timeout_ms: duration_ms(settings.op_timeout),
            memory_capacity: settings.memory_capacity.get(),
        }
    }
}

impl CacheConfig {
    pub fn list_ttl(&self) -> Duration {
        bounded_ttl(self.list_ttl_secs)
    }

    pub fn detail_ttl(&self) -> Duration {
        bounded_ttl(self.detail_ttl_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms.max(1))
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

fn bounded_ttl(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(1, defaults::MAX_TTL_SECS))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.namespace, "pressroom");
        assert_eq!(config.list_ttl(), Duration::from_secs(60));
        assert_eq!(config.detail_ttl(), Duration::from_secs(300));
        assert_eq!(config.cooldown(), Duration::from_secs(5));
        assert_eq!(config.op_timeout(), Duration::from_secs(2));
        assert_eq!(config.memory_capacity, 10_000);
    }

    #[test]
    fn list_entries_expire_before_details() {
        let config = CacheConfig::default();
        assert!(config.list_ttl() < config.detail_ttl());
    }

    #[test]
    fn zero_ttl_is_raised_to_one_second() {
        let config = CacheConfig {
            list_ttl_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.list_ttl(), Duration::from_secs(1));
    }

    #[test]
    fn oversized_ttl_is_capped() {
        let config = CacheConfig {
            detail_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(
            config.detail_ttl(),
            Duration::from_secs(defaults::MAX_TTL_SECS)
        );
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }
}
