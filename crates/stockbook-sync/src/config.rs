//! # Sync Configuration
//!
//! Configuration for the offline client and its sync agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKBOOK_SYNC_MODE=offline                                        │
//! │     STOCKBOOK_STORE_NAME=Downtown                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockbook/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.stockbook.stockbook/sync.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Online, generated device id, 30s poll                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [store]
//! name = "Downtown"
//!
//! [sync]
//! mode = "online"          # online | offline
//! poll_interval_secs = 30
//! batch_size = 50
//! recent_transactions_limit = 200
//! sweep_unsynced = true
//!
//! [database]
//! path = "/var/lib/stockbook/client.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Mode
// =============================================================================

/// Whether the agent talks to the server at all.
///
/// `Offline` keeps every local operation working (sales go to the queue)
/// but the agent never drains. Flip back to `Online` and the next cycle
/// replays everything in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Online,
    Offline,
}

impl SyncMode {
    pub fn is_sync_enabled(&self) -> bool {
        matches!(self, SyncMode::Online)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Online => write!(f, "online"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" | "auto" => Ok(SyncMode::Online),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: online, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Generated on first run if not provided.
    pub id: String,

    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Register".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

/// The store this device rings sales up for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_name")]
    pub name: String,
}

fn default_store_name() -> String {
    "Main Store".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            name: default_store_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Seconds between timer-triggered cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Queue items fetched per drain round.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// How many recent server transactions a pull mirrors.
    #[serde(default = "default_recent_limit")]
    pub recent_transactions_limit: u32,

    /// Re-post local sales still missing `synced_at` after the drain.
    #[serde(default = "default_true")]
    pub sweep_unsynced: bool,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    50
}
fn default_recent_limit() -> u32 {
    200
}
fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            recent_transactions_limit: default_recent_limit(),
            sweep_unsynced: true,
        }
    }
}

/// Where the client's local database (queue, mirror, local sales) lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// `None` puts it next to the config file.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }
        if self.store.name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("store.name must not be empty".into()));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("STOCKBOOK_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("STOCKBOOK_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(name) = std::env::var("STOCKBOOK_STORE_NAME") {
            self.store.name = name;
        }

        if let Ok(mode) = std::env::var("STOCKBOOK_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Ok(secs) = std::env::var("STOCKBOOK_POLL_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.sync.poll_interval_secs = s;
            }
        }

        if let Ok(size) = std::env::var("STOCKBOOK_BATCH_SIZE") {
            if let Ok(n) = size.parse::<u32>() {
                self.sync.batch_size = n;
            }
        }

        if let Ok(path) = std::env::var("STOCKBOOK_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "stockbook", "stockbook")
    }

    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn store_name(&self) -> &str {
        &self.store.name
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    /// Configured path, else `client.db` in the platform data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.path.clone().or_else(|| {
            Self::project_dirs().map(|dirs| dirs.data_dir().join("client.db"))
        })
    }
}
