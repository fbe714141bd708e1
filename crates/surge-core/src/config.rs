//! Migrator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Migrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Per-item retry backoff for failed reconciles
    pub rate_limiter: RateLimiterConfig,
    /// Retryable write failures tolerated before a task fails
    pub max_write_retries: u32,
    /// Eviction of finished tasks
    pub retention: RetentionPolicy,
    /// Interval callers use when polling for progress
    pub poll_interval_ms: u64,
}

impl MigratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With worker count
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// With rate limiter
    #[inline]
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// With write retry budget
    #[inline]
    #[must_use]
    pub fn with_max_write_retries(mut self, retries: u32) -> Self {
        self.max_write_retries = retries;
        self
    }

    /// With retention policy
    #[inline]
    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Poll interval as a duration
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            rate_limiter: RateLimiterConfig::default(),
            max_write_retries: 5,
            retention: RetentionPolicy::default(),
            poll_interval_ms: 1000,
        }
    }
}

/// Exponential per-item backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Delay after the first failure
    pub base_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_ms: u64,
}

impl RateLimiterConfig {
    /// Delay before the `failures`-th retry (1-based)
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(63);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
        }
    }
}

/// How long finished tasks stay queryable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Finished tasks older than this are evicted
    pub finished_ttl_secs: u64,
    /// At most this many finished tasks are kept, oldest evicted first
    pub max_finished: usize,
}

impl RetentionPolicy {
    /// TTL as a duration
    #[inline]
    #[must_use]
    pub fn finished_ttl(&self) -> Duration {
        Duration::from_secs(self.finished_ttl_secs)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            finished_ttl_secs: 3600,
            max_finished: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let limiter = RateLimiterConfig {
            base_delay_ms: 5,
            max_delay_ms: 100,
        };
        assert_eq!(limiter.delay_for(1), Duration::from_millis(5));
        assert_eq!(limiter.delay_for(2), Duration::from_millis(10));
        assert_eq!(limiter.delay_for(3), Duration::from_millis(20));
        assert_eq!(limiter.delay_for(10), Duration::from_millis(100));
        assert_eq!(limiter.delay_for(200), Duration::from_millis(100));
    }

    #[test]
    fn default_config() {
        let config = MigratorConfig::new();
        assert_eq!(config.workers, 5);
        assert_eq!(config.max_write_retries, 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.retention.finished_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: MigratorConfig = serde_json::from_str(r#"{"workers": 2}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.rate_limiter, RateLimiterConfig::default());
    }
}
