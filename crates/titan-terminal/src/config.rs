//! # Terminal Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TITAN_TERMINAL_ID=LANE-01                                          │
//! │     TITAN_DATA_ROOT=/srv/titan                                         │
//! │     TITAN_WAL_SYNC=batched                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     <data_root>/terminals/<id>/terminal.toml (if id + root in env)     │
//! │     ~/.config/pos/terminal.toml (Linux)                                │
//! │     ~/Library/Application Support/com.titan.pos/terminal.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [terminal]
//! id = "LANE-01"
//!
//! [storage]
//! data_root = "/srv/titan"
//! wal_sync = "batched"          # every_append | batched
//! max_buffered_entries = 64
//! max_buffer_age_ms = 200
//! corrupt_lock_grace_secs = 30
//!
//! [ledger]
//! partial_payment = false
//!
//! [coordinator]
//! poll_interval_ms = 500
//! shutdown_grace_secs = 30
//! message_ttl_secs = 300
//! ```
//!
//! Load errors surface. There is no fall-back-to-defaults path: a terminal
//! that silently started with the wrong data root would write a second,
//! empty ledger.

use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use titan_core::validation::validate_terminal_id;
use titan_ledger::{StoreOptions, SyncPolicy, TerminalPaths};

use crate::error::{TerminalError, TerminalResult};

// =============================================================================
// WAL Sync Mode
// =============================================================================

/// How eagerly the WAL reaches stable storage.
///
/// ```text
/// EVERY_APPEND (Default)              │  BATCHED
/// ──────────────────────              │  ───────
/// • sync_data after every entry       │  • lines / tenders / voids buffered
/// • nothing acknowledged is lost      │  • begin, commit, abort, sessions
///                                     │    and lifecycle entries immediate
///                                     │  • a crash may drop buffered edits
///                                     │    of still-open transactions
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalSyncMode {
    #[default]
    EveryAppend,
    Batched,
}

impl std::fmt::Display for WalSyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalSyncMode::EveryAppend => write!(f, "every_append"),
            WalSyncMode::Batched => write!(f, "batched"),
        }
    }
}

impl std::str::FromStr for WalSyncMode {
    type Err = TerminalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "every_append" | "every-append" | "immediate" => Ok(WalSyncMode::EveryAppend),
            "batched" | "buffered" => Ok(WalSyncMode::Batched),
            other => Err(TerminalError::InvalidConfig(format!(
                "Unknown WAL sync mode: '{}'. Valid options: every_append, batched",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalSettings {
    /// Terminal identifier; names the data directory and the lock.
    #[serde(default)]
    pub id: String,
}

/// Where and how the ledger is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root shared by every terminal on this machine.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default)]
    pub wal_sync: WalSyncMode,

    /// Batched mode: flush once this many entries are buffered.
    #[serde(default = "default_max_buffered_entries")]
    pub max_buffered_entries: usize,

    /// Batched mode: flush once the oldest buffered entry is this old.
    #[serde(default = "default_max_buffer_age_ms")]
    pub max_buffer_age_ms: u64,

    /// An unreadable lock record younger than this is treated as held.
    #[serde(default = "default_corrupt_lock_grace_secs")]
    pub corrupt_lock_grace_secs: u64,
}

fn default_data_root() -> PathBuf {
    directories::ProjectDirs::from("com", "titan", "pos")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("titan-data"))
}

fn default_max_buffered_entries() -> usize {
    64
}

fn default_max_buffer_age_ms() -> u64 {
    200
}

fn default_corrupt_lock_grace_secs() -> u64 {
    30
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            data_root: default_data_root(),
            wal_sync: WalSyncMode::default(),
            max_buffered_entries: default_max_buffered_entries(),
            max_buffer_age_ms: default_max_buffer_age_ms(),
            corrupt_lock_grace_secs: default_corrupt_lock_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Allow commit while total tendered is below total due.
    #[serde(default)]
    pub partial_payment: bool,
}

/// Registry, messaging and shutdown timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Interval between inbox / broadcast polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Default time open transactions get to finish on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Lifetime of messages this terminal sends.
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,

    /// Message ids remembered for deduplication.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Initial backoff for retried shared-directory writes (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between retries (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Give up retrying after this long (milliseconds).
    #[serde(default = "default_max_retry_elapsed")]
    pub max_retry_elapsed_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_message_ttl_secs() -> u64 {
    300
}
fn default_dedup_capacity() -> usize {
    1024
}
fn default_initial_backoff() -> u64 {
    20
}
fn default_max_backoff() -> u64 {
    500
}
fn default_max_retry_elapsed() -> u64 {
    2_000
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            message_ttl_secs: default_message_ttl_secs(),
            dedup_capacity: default_dedup_capacity(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_retry_elapsed_ms: default_max_retry_elapsed(),
        }
    }
}

impl CoordinatorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    /// Backoff used for registry and message writes.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_backoff_ms),
            max_interval: Duration::from_millis(self.max_backoff_ms),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_millis(self.max_retry_elapsed_ms)),
            ..Default::default()
        }
    }

    /// Applies one `ConfigChange` setting. Only coordinator timings can
    /// change at runtime; ledger and storage settings need a restart.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> TerminalResult<()> {
        let parse = |v: &str| {
            v.parse::<u64>().map_err(|_| {
                TerminalError::InvalidConfig(format!("{} must be an integer, got '{}'", key, v))
            })
        };
        match key {
            "coordinator.poll_interval_ms" => {
                let ms = parse(value)?;
                if ms == 0 {
                    return Err(TerminalError::InvalidConfig(
                        "poll_interval_ms must be greater than 0".into(),
                    ));
                }
                self.poll_interval_ms = ms;
            }
            "coordinator.shutdown_grace_secs" => self.shutdown_grace_secs = parse(value)?,
            "coordinator.message_ttl_secs" => self.message_ttl_secs = parse(value)?,
            other => {
                return Err(TerminalError::InvalidConfig(format!(
                    "'{}' cannot be changed at runtime",
                    other
                )))
            }
        }
        Ok(())
    }
}

// =============================================================================
// Main Terminal Configuration
// =============================================================================

/// Complete terminal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default)]
    pub terminal: TerminalSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub coordinator: CoordinatorSettings,
}

impl TerminalConfig {
    /// Config for `terminal_id` under `data_root`, everything else default.
    pub fn for_terminal(terminal_id: &str, data_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.terminal.id = terminal_id.to_string();
        config.storage.data_root = data_root.into();
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (terminal.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> TerminalResult<Self> {
        let config = Self::load_unvalidated(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Same as [`TerminalConfig::load`] without the final validation, for
    /// tools that fill in the terminal id themselves.
    pub fn load_unvalidated(config_path: Option<PathBuf>) -> TerminalResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading terminal config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| TerminalError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Saves configuration to file.
    ///
    /// Without an explicit path the file goes into the terminal's own
    /// directory (`terminal.toml`).
    pub fn save(&self, config_path: Option<PathBuf>) -> TerminalResult<PathBuf> {
        let path = match config_path {
            Some(path) => path,
            None => {
                if self.terminal.id.is_empty() {
                    return Err(TerminalError::MissingTerminalId);
                }
                self.paths().config()
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TerminalError::ConfigSaveFailed(format!("{}: {}", parent.display(), e)))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .map_err(|e| TerminalError::ConfigSaveFailed(format!("{}: {}", path.display(), e)))?;

        info!(?path, "Terminal config saved");
        Ok(path)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> TerminalResult<()> {
        if self.terminal.id.is_empty() {
            return Err(TerminalError::MissingTerminalId);
        }
        validate_terminal_id(&self.terminal.id)
            .map_err(|e| TerminalError::InvalidConfig(e.to_string()))?;

        if self.storage.data_root.as_os_str().is_empty() {
            return Err(TerminalError::InvalidConfig(
                "data_root must not be empty".into(),
            ));
        }

        if self.storage.wal_sync == WalSyncMode::Batched && self.storage.max_buffered_entries == 0 {
            return Err(TerminalError::InvalidConfig(
                "max_buffered_entries must be greater than 0 in batched mode".into(),
            ));
        }

        if self.coordinator.poll_interval_ms == 0 {
            return Err(TerminalError::InvalidConfig(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }

        if self.coordinator.dedup_capacity == 0 {
            return Err(TerminalError::InvalidConfig(
                "dedup_capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides from `lookup` (the process environment in `load`).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> TerminalResult<()> {
        if let Some(id) = lookup("TITAN_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal ID from environment");
            self.terminal.id = id;
        }

        if let Some(root) = lookup("TITAN_DATA_ROOT") {
            debug!(data_root = %root, "Overriding data root from environment");
            self.storage.data_root = PathBuf::from(root);
        }

        if let Some(mode) = lookup("TITAN_WAL_SYNC") {
            self.storage.wal_sync = mode.parse()?;
        }

        if let Some(flag) = lookup("TITAN_PARTIAL_PAYMENT") {
            self.ledger.partial_payment = match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(TerminalError::InvalidConfig(format!(
                        "TITAN_PARTIAL_PAYMENT must be a boolean, got '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(ms) = lookup("TITAN_POLL_INTERVAL_MS") {
            match ms.parse::<u64>() {
                Ok(ms) => self.coordinator.poll_interval_ms = ms,
                Err(_) => warn!(value = %ms, "Ignoring non-numeric TITAN_POLL_INTERVAL_MS"),
            }
        }

        if let Some(secs) = lookup("TITAN_SHUTDOWN_GRACE_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => self.coordinator.shutdown_grace_secs = secs,
                Err(_) => warn!(value = %secs, "Ignoring non-numeric TITAN_SHUTDOWN_GRACE_SECS"),
            }
        }

        Ok(())
    }

    /// Returns the default config file path.
    ///
    /// The terminal's own `terminal.toml` wins when the environment names
    /// both the data root and the terminal.
    fn default_config_path() -> Option<PathBuf> {
        if let (Ok(root), Ok(id)) = (
            std::env::var("TITAN_DATA_ROOT"),
            std::env::var("TITAN_TERMINAL_ID"),
        ) {
            let local = TerminalPaths::new(&root, &id).config();
            if local.exists() {
                return Some(local);
            }
        }
        directories::ProjectDirs::from("com", "titan", "pos")
            .map(|dirs| dirs.config_dir().join("terminal.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn terminal_id(&self) -> &str {
        &self.terminal.id
    }

    pub fn data_root(&self) -> &Path {
        &self.storage.data_root
    }

    pub fn paths(&self) -> TerminalPaths {
        TerminalPaths::new(&self.storage.data_root, &self.terminal.id)
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        match self.storage.wal_sync {
            WalSyncMode::EveryAppend => SyncPolicy::EveryAppend,
            WalSyncMode::Batched => SyncPolicy::Batched {
                max_buffered_entries: self.storage.max_buffered_entries,
                max_buffer_age: Duration::from_millis(self.storage.max_buffer_age_ms),
            },
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            sync_policy: self.sync_policy(),
            partial_payment: self.ledger.partial_payment,
        }
    }

    pub fn corrupt_lock_grace(&self) -> Duration {
        Duration::from_secs(self.storage.corrupt_lock_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_wal_sync_parsing() {
        assert_eq!("batched".parse::<WalSyncMode>().unwrap(), WalSyncMode::Batched);
        assert_eq!(
            "every_append".parse::<WalSyncMode>().unwrap(),
            WalSyncMode::EveryAppend
        );
        assert!("sometimes".parse::<WalSyncMode>().is_err());
    }

    #[test]
    fn test_default_config_needs_terminal_id() {
        let config = TerminalConfig::default();
        assert!(matches!(config.validate(), Err(TerminalError::MissingTerminalId)));

        let config = TerminalConfig::for_terminal("LANE-01", "/srv/titan");
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_policy(), SyncPolicy::EveryAppend);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TerminalConfig::for_terminal("lane 01", "/srv/titan");
        assert!(config.validate().unwrap_err().is_config_error());

        config.terminal.id = "LANE-01".into();
        config.storage.wal_sync = WalSyncMode::Batched;
        config.storage.max_buffered_entries = 0;
        assert!(config.validate().is_err());

        config.storage.max_buffered_entries = 8;
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.sync_policy(),
            SyncPolicy::Batched {
                max_buffered_entries: 8,
                ..
            }
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TerminalConfig::default();
        config
            .apply_overrides(env(&[
                ("TITAN_TERMINAL_ID", "LANE-07"),
                ("TITAN_DATA_ROOT", "/data/titan"),
                ("TITAN_WAL_SYNC", "batched"),
                ("TITAN_PARTIAL_PAYMENT", "true"),
            ]))
            .unwrap();

        assert_eq!(config.terminal_id(), "LANE-07");
        assert_eq!(config.data_root(), Path::new("/data/titan"));
        assert_eq!(config.storage.wal_sync, WalSyncMode::Batched);
        assert!(config.store_options().partial_payment);

        assert!(config
            .apply_overrides(env(&[("TITAN_PARTIAL_PAYMENT", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TerminalConfig::for_terminal("LANE-01", dir.path());
        config.storage.wal_sync = WalSyncMode::Batched;
        config.coordinator.poll_interval_ms = 250;

        let path = config.save(None).unwrap();
        assert_eq!(path, config.paths().config());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[storage]"));
        let loaded: TerminalConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.terminal_id(), "LANE-01");
        assert_eq!(loaded.storage.wal_sync, WalSyncMode::Batched);
        assert_eq!(loaded.coordinator.poll_interval_ms, 250);
    }

    #[test]
    fn test_malformed_file_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terminal.toml");
        std::fs::write(&path, "[storage\nwal_sync = 3").unwrap();

        let err = TerminalConfig::load(Some(path)).unwrap_err();
        assert!(matches!(err, TerminalError::ConfigLoadFailed(_)));
    }

    #[test]
    fn test_runtime_settings() {
        let mut settings = CoordinatorSettings::default();
        settings
            .apply_setting("coordinator.poll_interval_ms", "100")
            .unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_millis(100));

        assert!(settings.apply_setting("coordinator.poll_interval_ms", "0").is_err());
        assert!(settings.apply_setting("ledger.partial_payment", "true").is_err());
    }
}
