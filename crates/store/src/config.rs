use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime knobs of the watcher loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// First retry delay after a failed list or watch open.
    pub backoff_base: Duration,
    pub backoff_factor: u32,
    pub backoff_max: Duration,
    /// Periodic full relist while watching; None disables it.
    pub relist_interval: Option<Duration>,
    /// A watch that stayed open at least this long and then closed is
    /// reopened at once, even if it delivered nothing.
    pub healthy_watch_after: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_factor: 2,
            backoff_max: Duration::from_secs(30),
            relist_interval: Some(Duration::from_secs(300)),
            healthy_watch_after: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by `REPOWATCH_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_parse::<u64>("REPOWATCH_BACKOFF_BASE_MS") {
            cfg.backoff_base = Duration::from_millis(ms.max(1));
        }
        if let Some(f) = env_parse::<u32>("REPOWATCH_BACKOFF_FACTOR") {
            cfg.backoff_factor = f.max(1);
        }
        if let Some(secs) = env_parse::<u64>("REPOWATCH_BACKOFF_MAX_SECS") {
            cfg.backoff_max = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_parse::<u64>("REPOWATCH_RELIST_SECS") {
            cfg.relist_interval = if secs == 0 { None } else { Some(Duration::from_secs(secs)) };
        }
        if let Some(secs) = env_parse::<u64>("REPOWATCH_HEALTHY_WATCH_SECS") {
            cfg.healthy_watch_after = Duration::from_secs(secs);
        }
        cfg
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_relist_interval(mut self, interval: Option<Duration>) -> Self {
        self.relist_interval = interval;
        self
    }

    pub fn with_healthy_watch_after(mut self, after: Duration) -> Self {
        self.healthy_watch_after = after;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
