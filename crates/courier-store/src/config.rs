//! Store configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a backend can be built with zero
//! configuration for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;

use crate::cache::CachedStorage;
use crate::json::JsonStorage;
use crate::storage::DataStorage;

/// File name of the JSON store inside the data directory.
pub const STORE_FILE_NAME: &str = "courier.json";

/// Which backend [`StoreConfig::build`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Cache,
    Json,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache" | "memory" => Ok(StorageKind::Cache),
            "json" | "file" => Ok(StorageKind::Json),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Settings of the TTL cache backend.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry may go untouched before it is evicted.
    pub ttl: Duration,
    /// Pause between two sweeper passes.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

/// Settings of the JSON file backend.
#[derive(Debug, Clone)]
pub struct JsonConfig {
    pub path: PathBuf,
    /// Write the file after every successful mutation instead of only on
    /// `flush()`/`close()`.
    pub flush_on_write: bool,
}

impl JsonConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_on_write: false,
        }
    }
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self::new(default_store_path())
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Env: `COURIER_STORAGE` (`cache` | `json`)
    /// Default: `json`
    pub backend: StorageKind,

    /// Env: `COURIER_CACHE_TTL_SECS`, `COURIER_SWEEP_INTERVAL_MS`
    /// Default: 15 minutes / 1000 ms
    pub cache: CacheConfig,

    /// Env: `COURIER_STORE_PATH`, `COURIER_FLUSH_ON_WRITE` (true/false)
    /// Default: platform data directory, no flush on write.
    pub json: JsonConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StorageKind::Json,
            cache: CacheConfig::default(),
            json: JsonConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = var("COURIER_STORAGE") {
            match val.parse::<StorageKind>() {
                Ok(kind) => config.backend = kind,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid COURIER_STORAGE, using default");
                }
            }
        }

        if let Some(val) = var("COURIER_CACHE_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.cache.ttl = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid COURIER_CACHE_TTL_SECS, using default"),
            }
        }

        if let Some(val) = var("COURIER_SWEEP_INTERVAL_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.cache.sweep_interval = Duration::from_millis(ms),
                _ => {
                    tracing::warn!(value = %val, "Invalid COURIER_SWEEP_INTERVAL_MS, using default")
                }
            }
        }

        if let Some(path) = var("COURIER_STORE_PATH") {
            if !path.is_empty() {
                config.json.path = PathBuf::from(path);
            }
        }

        if let Some(val) = var("COURIER_FLUSH_ON_WRITE") {
            config.json.flush_on_write = val != "false" && val != "0";
        }

        config
    }

    /// Construct the selected backend.  The backend is returned closed.
    pub fn build(&self) -> Box<dyn DataStorage> {
        match self.backend {
            StorageKind::Cache => Box::new(CachedStorage::new(self.cache.clone())),
            StorageKind::Json => Box::new(JsonStorage::new(self.json.clone())),
        }
    }
}

/// Location of the JSON store when none is configured.
///
/// - Linux:   `~/.local/share/courier/courier.json`
/// - macOS:   `~/Library/Application Support/org.courier.courier/courier.json`
/// - Windows: `{FOLDERID_RoamingAppData}\courier\courier\data\courier.json`
///
/// Falls back to the working directory when no home directory is known.
pub fn default_store_path() -> PathBuf {
    match ProjectDirs::from("org", "courier", "courier") {
        Some(dirs) => dirs.data_dir().join(STORE_FILE_NAME),
        None => PathBuf::from(".").join(STORE_FILE_NAME),
    }
}
