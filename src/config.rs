//! Application-level configuration loading: round timing, throttling, cache layout and sweeps.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use rand::{Rng, distr::Alphanumeric};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{dao::cache::CacheSettings, state::session::ThrottleConfig};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ROUND_TAP_BACK_CONFIG_PATH";

const COOLDOWN_ENV: &str = "COOLDOWN_DURATION";
const ROUND_DURATION_ENV: &str = "ROUND_DURATION";
const THROTTLE_ENV: &str = "TAP_THROTTLE_MS";
const KEY_PREFIX_ENV: &str = "CACHE_KEY_PREFIX";
const INSTANCE_ID_ENV: &str = "INSTANCE_ID";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Round timing.
    pub game: GameSettings,
    /// Per-user tap throttle.
    pub throttle: ThrottleSettings,
    /// Cache key layout and expiries.
    pub cache: CacheConfig,
    /// Background sweep intervals.
    pub sync: SyncSettings,
    /// Event fanout settings.
    pub broadcast: BroadcastSettings,
    /// Round listing defaults.
    pub rounds: RoundsSettings,
}

/// Durations shaping every new round, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Delay between creation and the start of a round.
    pub cooldown_secs: u64,
    /// Length of the active window.
    pub round_secs: u64,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 30,
            round_secs: 60,
        }
    }
}

/// Minimum spacing between two taps of one user.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Taps closer together than this are rejected.
    pub window_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self { window_ms: 50 }
    }
}

/// Layout and lifetimes of cached round data.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prepended to every cache key.
    pub key_prefix: String,
    /// How long a leaderboard outlives the end of its round.
    pub leaderboard_ttl_secs: u64,
    /// Expiry of the last-tap marker used by the throttle.
    pub last_tap_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rounds:".into(),
            leaderboard_ttl_secs: 3600,
            last_tap_ttl_secs: 10,
        }
    }
}

/// Periods of the status, sync and cleanup sweeps.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Status transition sweep period.
    pub status_interval_ms: u64,
    /// Cache to round store write-back period.
    pub sync_interval_ms: u64,
    /// Finished round purge period.
    pub cleanup_interval_ms: u64,
    /// How long a finished round stays cached after its last update.
    pub finished_retention_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            status_interval_ms: 2_000,
            sync_interval_ms: 10_000,
            cleanup_interval_ms: 30_000,
            finished_retention_secs: 3_600,
        }
    }
}

/// Local and inter-instance event delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Shared pub/sub channel name.
    pub channel: String,
    /// Capacity of each local broadcast channel.
    pub local_capacity: usize,
    /// Identity tagged on published events; generated when absent.
    pub instance_id: Option<String>,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            channel: "rounds:inter-instance".into(),
            local_capacity: 64,
            instance_id: None,
        }
    }
}

/// Paging of the round list.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoundsSettings {
    /// Page size when the request names no limit.
    pub default_page_size: usize,
}

impl Default for RoundsSettings {
    fn default() -> Self {
        Self {
            default_page_size: 20,
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let mut config = Self::from_file();
        config.apply_overrides(|key| env::var(key).ok());
        config
    }

    fn from_file() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration file");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Apply `KEY=value` overrides provided by `lookup`. Unparseable numbers are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, value = %raw, error = %err, "ignoring invalid numeric override");
                    None
                }
            }
        };

        if let Some(secs) = number(COOLDOWN_ENV) {
            self.game.cooldown_secs = secs;
        }
        if let Some(secs) = number(ROUND_DURATION_ENV) {
            self.game.round_secs = secs;
        }
        if let Some(ms) = number(THROTTLE_ENV) {
            self.throttle.window_ms = ms;
        }
        if let Some(prefix) = lookup(KEY_PREFIX_ENV).filter(|value| !value.is_empty()) {
            self.cache.key_prefix = prefix;
        }
        if let Some(id) = lookup(INSTANCE_ID_ENV).filter(|value| !value.is_empty()) {
            self.broadcast.instance_id = Some(id);
        }
    }

    /// Configured cooldown as a calendar duration.
    pub fn cooldown(&self) -> time::Duration {
        time::Duration::seconds(saturating_i64(self.game.cooldown_secs))
    }

    /// Configured active window length.
    pub fn round_length(&self) -> time::Duration {
        time::Duration::seconds(saturating_i64(self.game.round_secs))
    }

    /// Tap throttle derived from [`ThrottleSettings`].
    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig::new(self.throttle.window_ms)
    }

    /// Settings handed to the cache repository.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            key_prefix: self.cache.key_prefix.clone(),
            leaderboard_ttl: Duration::from_secs(self.cache.leaderboard_ttl_secs),
            last_tap_ttl: Duration::from_secs(self.cache.last_tap_ttl_secs),
        }
    }

    /// Never zero, so the sweep interval stays valid.
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.sync.status_interval_ms.max(1))
    }

    /// Write-back sweep period.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync.sync_interval_ms.max(1))
    }

    /// Purge sweep period.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.sync.cleanup_interval_ms.max(1))
    }

    /// Grace period before a finished round leaves the cache.
    pub fn finished_retention(&self) -> time::Duration {
        time::Duration::seconds(saturating_i64(self.sync.finished_retention_secs))
    }

    /// Configured instance identity, or `{HOSTNAME}-{random}`.
    pub fn instance_id(&self) -> String {
        self.broadcast.instance_id.clone().unwrap_or_else(|| {
            let host = env::var("HOSTNAME").unwrap_or_else(|_| "instance".into());
            let suffix: String = rand::rng()
                .sample_iter(Alphanumeric)
                .take(9)
                .map(char::from)
                .collect();
            format!("{host}-{}", suffix.to_lowercase())
        })
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
