//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/provider-sync/config.toml`
//! 3. Explicit config file (`--config`)
//! 4. Environment variables: `PROVIDER_SYNC_*`
//!
//! Files may be partial; missing keys keep the value from the previous layer.
//!
//! # Example Config
//!
//! ```toml
//! database_url = "sqlite:provider-sync.db?mode=rwc"
//!
//! [registry]
//! base_url = "https://provider-data.example"
//! api_key = "secret"
//!
//! [sync]
//! polling_enabled = true
//! interval_secs = 86400
//! lock_ttl_secs = 1800
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub registry: RegistryConfig,
    pub sync: SyncConfig,
    pub worker: WorkerConfig,
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_url: String,
    /// Sent as the `x-authorization` header when non-empty.
    pub api_key: String,
    pub use_local_file: bool,
    pub local_file_path: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub polling_enabled: bool,
    pub run_on_startup: bool,
    pub interval_secs: u64,
    pub lock_key: String,
    /// Lease lifetime. Must outlast the slowest run; nothing renews it.
    pub lock_ttl_secs: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Holder id written into leases. Empty means a random UUID per process.
    pub instance_id: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:provider-sync.db?mode=rwc".to_string(),
            registry: RegistryConfig::default(),
            sync: SyncConfig::default(),
            worker: WorkerConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            use_local_file: false,
            local_file_path: String::new(),
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            polling_enabled: true,
            run_on_startup: false,
            interval_secs: 86_400,
            lock_key: "PROVIDER_DATA_SYNC_LOCK".to_string(),
            lock_ttl_secs: 1_800,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { queue_capacity: 2 }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration through every layer and validate the result.
///
/// A missing global file is skipped; a missing `explicit` file is an error.
pub async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    // 1. Start with built-in defaults
    let mut config = Config::default();

    // 2. Global config if it exists
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            config = load_toml_file(&global_path, &config).await?;
        }
    }

    // 3. Explicit config file
    if let Some(path) = explicit {
        config = load_toml_file(path, &config).await?;
    }

    // 4. Environment variable overrides
    config.apply_env_vars()?;

    // 5. Validate
    config.validate()?;

    Ok(config)
}

fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "provider-sync")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Read a TOML file and lay it over `base`.
///
/// Keys absent from the file keep `base`'s values: the file is merged into
/// the serialized base as a TOML table before deserializing.
async fn load_toml_file(path: &Path, base: &Config) -> Result<Config> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::IoError(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    let overlay: toml::Table = toml::from_str(&content)
        .map_err(|e| Error::ParseError(format!("Failed to parse config: {}: {e}", path.display())))?;

    let toml::Value::Table(mut merged) = toml::Value::try_from(base)
        .map_err(|e| Error::InvalidConfig(format!("Failed to serialize config: {e}")))?
    else {
        return Err(Error::InvalidConfig(
            "Config did not serialize to a table".to_string(),
        ));
    };
    merge_tables(&mut merged, overlay);

    toml::Value::Table(merged)
        .try_into()
        .map_err(|e| Error::ParseError(format!("Invalid config: {}: {e}", path.display())))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("Invalid {name} value: {e}")))
}

impl Config {
    fn apply_env_vars(&mut self) -> Result<()> {
        // PROVIDER_SYNC_DATABASE_URL
        if let Ok(value) = std::env::var("PROVIDER_SYNC_DATABASE_URL") {
            self.database_url = value;
        }

        // PROVIDER_SYNC_REGISTRY_BASE_URL
        if let Ok(value) = std::env::var("PROVIDER_SYNC_REGISTRY_BASE_URL") {
            self.registry.base_url = value;
        }

        // PROVIDER_SYNC_REGISTRY_API_KEY
        if let Ok(value) = std::env::var("PROVIDER_SYNC_REGISTRY_API_KEY") {
            self.registry.api_key = value;
        }

        // PROVIDER_SYNC_USE_LOCAL_FILE
        if let Ok(value) = std::env::var("PROVIDER_SYNC_USE_LOCAL_FILE") {
            self.registry.use_local_file = parse_env("PROVIDER_SYNC_USE_LOCAL_FILE", &value)?;
        }

        // PROVIDER_SYNC_LOCAL_FILE_PATH
        if let Ok(value) = std::env::var("PROVIDER_SYNC_LOCAL_FILE_PATH") {
            self.registry.local_file_path = value;
        }

        // PROVIDER_SYNC_POLLING_ENABLED
        if let Ok(value) = std::env::var("PROVIDER_SYNC_POLLING_ENABLED") {
            self.sync.polling_enabled = parse_env("PROVIDER_SYNC_POLLING_ENABLED", &value)?;
        }

        // PROVIDER_SYNC_RUN_ON_STARTUP
        if let Ok(value) = std::env::var("PROVIDER_SYNC_RUN_ON_STARTUP") {
            self.sync.run_on_startup = parse_env("PROVIDER_SYNC_RUN_ON_STARTUP", &value)?;
        }

        // PROVIDER_SYNC_INTERVAL_SECS
        if let Ok(value) = std::env::var("PROVIDER_SYNC_INTERVAL_SECS") {
            self.sync.interval_secs = parse_env("PROVIDER_SYNC_INTERVAL_SECS", &value)?;
        }

        // PROVIDER_SYNC_LOCK_TTL_SECS
        if let Ok(value) = std::env::var("PROVIDER_SYNC_LOCK_TTL_SECS") {
            self.sync.lock_ttl_secs = parse_env("PROVIDER_SYNC_LOCK_TTL_SECS", &value)?;
        }

        // PROVIDER_SYNC_QUEUE_CAPACITY
        if let Ok(value) = std::env::var("PROVIDER_SYNC_QUEUE_CAPACITY") {
            self.worker.queue_capacity = parse_env("PROVIDER_SYNC_QUEUE_CAPACITY", &value)?;
        }

        // PROVIDER_SYNC_INSTANCE_ID
        if let Ok(value) = std::env::var("PROVIDER_SYNC_INSTANCE_ID") {
            self.lock.instance_id = value;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::ValidationError(
                "database_url must not be empty".to_string(),
            ));
        }

        if self.sync.interval_secs < 1 {
            return Err(Error::ValidationError(
                "sync.interval_secs must be at least 1".to_string(),
            ));
        }

        if self.sync.lock_ttl_secs < 1 {
            return Err(Error::ValidationError(
                "sync.lock_ttl_secs must be at least 1".to_string(),
            ));
        }

        if self.sync.lock_key.trim().is_empty() {
            return Err(Error::ValidationError(
                "sync.lock_key must not be empty".to_string(),
            ));
        }

        if !(1..=64).contains(&self.worker.queue_capacity) {
            return Err(Error::ValidationError(
                "worker.queue_capacity must be 1-64".to_string(),
            ));
        }

        if self.registry.connect_timeout_secs < 1 || self.registry.read_timeout_secs < 1 {
            return Err(Error::ValidationError(
                "registry timeouts must be at least 1 second".to_string(),
            ));
        }

        if self.registry.use_local_file {
            if self.registry.local_file_path.trim().is_empty() {
                return Err(Error::ValidationError(
                    "registry.local_file_path is required when use_local_file is set".to_string(),
                ));
            }
        } else if self.registry.base_url.trim().is_empty() {
            return Err(Error::ValidationError(
                "registry.base_url must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
