//! Configuration system for ridelink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RIDELINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ridelink/config.toml
//!   3. ~/.config/ridelink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RideLinkConfig {
    pub network: NetworkConfig,
    pub matching: MatchingConfig,
    pub requests: RequestsConfig,
    pub peer: PeerConfig,
    pub storage: StorageConfig,
    pub directory: DirectoryConfig,
    /// Seconds between stats log lines. 0 = never.
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address of the match/lifecycle service.
    pub ride_listen: String,
    /// Listen address of the rendezvous registry.
    pub rendezvous_listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minutes an offer window is widened on each side.
    pub time_tolerance_minutes: u16,
    /// Distance cut-off when the request names none. 0 = unlimited.
    pub default_max_distance_km: f64,
    /// Speed used to turn distances into `etaText`.
    pub average_speed_kmh: f64,
    /// Bound on a single rating lookup before it counts as unknown.
    pub rating_timeout_ms: u64,
    /// How long a looked-up rating is reused. 0 = no caching.
    pub rating_cache_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    /// Pending requests older than this expire.
    pub ttl_secs: u64,
    /// Interval of the expiry sweep.
    pub expiry_check_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Where clients find the rendezvous registry.
    pub rendezvous_addr: String,
    /// Where clients find the ride service.
    pub ride_addr: String,
    /// Bound on an outgoing direct connect.
    pub connect_timeout_secs: u64,
    /// Bound on waiting for the other side to dial in.
    pub accept_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for the rider ledger. Empty = keep it in memory.
    pub ledger_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// JSON file with user profiles. Empty = start with no profiles.
    pub users_path: PathBuf,
    /// Treat unknown users as drivers without a rating.
    pub open_registration: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ride_listen: "0.0.0.0:9000".to_string(),
            rendezvous_listen: "0.0.0.0:10000".to_string(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            time_tolerance_minutes: 15,
            default_max_distance_km: 0.0,
            average_speed_kmh: 30.0,
            rating_timeout_ms: 2000,
            rating_cache_secs: 60,
        }
    }
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            expiry_check_secs: 5,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            rendezvous_addr: "127.0.0.1:10000".to_string(),
            ride_addr: "127.0.0.1:9000".to_string(),
            connect_timeout_secs: 6,
            accept_timeout_secs: 12,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            users_path: PathBuf::new(),
            open_registration: true,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl MatchingConfig {
    /// `None` when no default cut-off applies.
    pub fn default_max_distance(&self) -> Option<f64> {
        (self.default_max_distance_km > 0.0).then_some(self.default_max_distance_km)
    }

    pub fn rating_timeout(&self) -> Duration {
        Duration::from_millis(self.rating_timeout_ms)
    }

    pub fn rating_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.rating_cache_secs)
    }
}

impl RequestsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl PeerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ridelink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RideLinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RideLinkConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RIDELINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RideLinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply overrides named `RIDELINK_<SECTION>__<KEY>` (top-level keys are
    /// `RIDELINK_<KEY>`). `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = lookup("RIDELINK_NETWORK__RIDE_LISTEN") {
            self.network.ride_listen = v;
        }
        if let Some(v) = lookup("RIDELINK_NETWORK__RENDEZVOUS_LISTEN") {
            self.network.rendezvous_listen = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_MATCHING__TIME_TOLERANCE_MINUTES") {
            self.matching.time_tolerance_minutes = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_MATCHING__DEFAULT_MAX_DISTANCE_KM") {
            self.matching.default_max_distance_km = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_MATCHING__RATING_TIMEOUT_MS") {
            self.matching.rating_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_MATCHING__AVERAGE_SPEED_KMH") {
            self.matching.average_speed_kmh = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_MATCHING__RATING_CACHE_SECS") {
            self.matching.rating_cache_secs = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_REQUESTS__TTL_SECS") {
            self.requests.ttl_secs = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_REQUESTS__EXPIRY_CHECK_SECS") {
            self.requests.expiry_check_secs = v;
        }
        if let Some(v) = lookup("RIDELINK_PEER__RENDEZVOUS_ADDR") {
            self.peer.rendezvous_addr = v;
        }
        if let Some(v) = lookup("RIDELINK_PEER__RIDE_ADDR") {
            self.peer.ride_addr = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_PEER__CONNECT_TIMEOUT_SECS") {
            self.peer.connect_timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_PEER__ACCEPT_TIMEOUT_SECS") {
            self.peer.accept_timeout_secs = v;
        }
        if let Some(v) = lookup("RIDELINK_STORAGE__LEDGER_PATH") {
            self.storage.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("RIDELINK_DIRECTORY__OPEN_REGISTRATION") {
            self.directory.open_registration = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RIDELINK_DIRECTORY__USERS_PATH") {
            self.directory.users_path = PathBuf::from(v);
        }
        if let Some(v) = parsed(&lookup, "RIDELINK_STATS_INTERVAL_SECS") {
            self.stats_interval_secs = v;
        }
    }
}

impl Default for RideLinkConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            matching: MatchingConfig::default(),
            requests: RequestsConfig::default(),
            peer: PeerConfig::default(),
            storage: StorageConfig::default(),
            directory: DirectoryConfig::default(),
            stats_interval_secs: 60,
        }
    }
}
