//! Configuration management for ferry
//!
//! Default config location: ~/.ferry/config.toml

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::UnpackLimits;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub license: LicenseConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Maximum request body size in bytes; bounds archive uploads (default: 512MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:9080".to_string()
}

fn default_max_body_size() -> usize {
    512 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors: CorsConfig::default(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Enable CORS (default: true for development)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allowed origins. Use "*" for any origin, or list specific origins.
    #[serde(default = "default_cors_origins")]
    pub origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            origins: default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// SQLite database file (default: `<data_dir>/ferry.db`)
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ferry")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
        }
    }
}

/// Import staging area settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Workspace root (default: `<data_dir>/staging`)
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Maximum number of concurrent staging sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// READY sessions older than this are reclaimed by the sweeper
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Upper bound on the bytes one archive may unpack to (default: 2GB)
    #[serde(default = "default_max_unpacked_bytes")]
    pub max_unpacked_bytes: u64,
    /// Upper bound on tar entries (files and directories) per archive
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

fn default_max_sessions() -> usize {
    64
}

fn default_max_age_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_unpacked_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_entries() -> u64 {
    10_000
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_sessions: default_max_sessions(),
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_unpacked_bytes: default_max_unpacked_bytes(),
            max_entries: default_max_entries(),
        }
    }
}

impl StagingConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn unpack_limits(&self) -> UnpackLimits {
        UnpackLimits::new(self.max_unpacked_bytes, self.max_entries)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Base64-encoded HS256 secret. When unset the server generates an
    /// ephemeral one at startup, invalidating tokens on restart.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_token_validity_secs")]
    pub token_validity_secs: u64,
    /// Identity used when the license does not require authentication
    #[serde(default = "default_login")]
    pub default_login: String,
    /// Paths reachable while the license is inactive
    #[serde(default = "default_break_glass_paths")]
    pub break_glass_paths: Vec<String>,
}

fn default_token_validity_secs() -> u64 {
    24 * 3600
}

fn default_login() -> String {
    "admin".to_string()
}

fn default_break_glass_paths() -> Vec<String> {
    vec!["/health".to_string(), "/api/v2/settings/license".to_string()]
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_validity_secs: default_token_validity_secs(),
            default_login: default_login(),
            break_glass_paths: default_break_glass_paths(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LicenseConfig {
    /// License JSON file; absent means no effective license
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log output format: "pretty" or "json"
    /// Override with LOG_FORMAT env var
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics at GET /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,ferry=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
            metrics_enabled: true,
        }
    }
}

pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Config {
    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let mut config: Config = toml::from_str(&content)?;
            config.expand_paths()?;
            Ok(config)
        } else {
            let mut config = Config::default();
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(config_path);
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Parse config from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.expand_paths()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Expand ~ in all paths
    fn expand_paths(&mut self) -> Result<()> {
        self.storage.data_dir = expand_tilde(&self.storage.data_dir)?;
        if let Some(ref db) = self.storage.database {
            self.storage.database = Some(expand_tilde(db)?);
        }
        if let Some(ref root) = self.staging.root {
            self.staging.root = Some(expand_tilde(root)?);
        }
        if let Some(ref license) = self.license.path {
            self.license.path = Some(expand_tilde(license)?);
        }
        Ok(())
    }

    /// Path of the SQLite entity store
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("ferry.db"))
    }

    /// Root directory for import staging workspaces
    pub fn staging_root(&self) -> PathBuf {
        self.staging
            .root
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("staging"))
    }
}
