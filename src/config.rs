use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("wick")
        .join("config.json")
}

fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("~/.cache"))
        .join("wick")
        .join("cache.json")
}

/// Retry budget for the action executor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt + 1`: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Upper bound on the total time spent waiting between attempts.
    pub fn max_total_wait(&self) -> Duration {
        (0..self.max_retries).map(|a| self.delay_for(a)).sum()
    }
}

/// Budget for a poll reconciliation session.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub initial_delay_ms: u64,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            interval_ms: 5000,
            initial_delay_ms: 2000,
        }
    }
}

impl PollOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Worst-case time for a session to resolve.
    pub fn deadline(&self) -> Duration {
        self.initial_delay() + self.interval() * self.max_attempts
    }
}

/// Freshness window per cached data kind.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct CacheTtls {
    pub summary_ms: u64,
    pub plan_ms: u64,
    pub notifications_ms: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            summary_ms: 3_600_000,
            plan_ms: 3_600_000,
            notifications_ms: 60_000,
        }
    }
}

impl CacheTtls {
    pub fn summary(&self) -> Duration {
        Duration::from_millis(self.summary_ms)
    }

    pub fn plan(&self) -> Duration {
        Duration::from_millis(self.plan_ms)
    }

    pub fn notifications(&self) -> Duration {
        Duration::from_millis(self.notifications_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct WickConfig {
    pub api_base_url: String,
    pub cache_path: PathBuf,
    pub retry: RetryPolicy,
    pub poll: PollOptions,
    pub cache_ttl: CacheTtls,
    pub debug_logging: bool,
}

impl Default for WickConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            cache_path: default_cache_path(),
            retry: RetryPolicy::default(),
            poll: PollOptions::default(),
            cache_ttl: CacheTtls::default(),
            debug_logging: false,
        }
    }
}

impl WickConfig {
    pub fn default_path() -> PathBuf {
        default_config_path()
    }

    /// Load from `path`, falling back to defaults when the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
