//! Cache sizing and timing.

use std::time::Duration;

/// Timing and capacity of one [`super::SwrCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a written value is served without refreshing.
    pub ttl: Duration,
    /// How long past `ttl` a value may still be served while a refresh runs.
    pub stale_while_revalidate: Duration,
    /// Oldest-inserted entries are pruned beyond this count.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(1500),
            stale_while_revalidate: Duration::from_millis(5000),
            max_entries: 200,
        }
    }
}

impl CacheConfig {
    /// Plain TTL cache: no stale window.
    pub fn ttl_only(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            stale_while_revalidate: Duration::ZERO,
            max_entries,
        }
    }

    /// Read `{prefix}_TTL_MS`, `{prefix}_SWR_MS` and `{prefix}_MAX_ENTRIES`.
    ///
    /// Missing or invalid values keep the corresponding field of `defaults`.
    pub fn from_env(prefix: &str, defaults: CacheConfig) -> Self {
        Self::from_lookup(prefix, defaults, |name| std::env::var(name).ok())
    }

    /// [`CacheConfig::from_env`] against an arbitrary variable source.
    pub fn from_lookup(
        prefix: &str,
        defaults: CacheConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let millis = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}"))
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let max_entries = lookup(&format!("{prefix}_MAX_ENTRIES"))
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);

        Self {
            ttl: millis("TTL_MS").unwrap_or(defaults.ttl),
            stale_while_revalidate: millis("SWR_MS").unwrap_or(defaults.stale_while_revalidate),
            max_entries: max_entries.unwrap_or(defaults.max_entries),
        }
    }
}
