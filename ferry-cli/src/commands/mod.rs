pub mod export;
pub mod import;
pub mod inspect;
pub mod token;

pub use export::run_export;
pub use import::run_import;
pub use inspect::run_inspect;
pub use token::run_token;

use anyhow::{Context, Result};
use ferry::config::Config;
use ferry_storage::SqliteStore;
use std::path::Path;
use std::sync::Arc;

/// Open the entity store named by the config file. Never creates a config.
pub(crate) fn open_store(config_path: &Path) -> Result<(Config, Arc<SqliteStore>)> {
    let config = load_config(config_path)?;
    let database = config.database_path();
    let store = SqliteStore::open(&database)
        .with_context(|| format!("Failed to open store at {:?}", database))?;
    Ok((config, Arc::new(store)))
}

pub(crate) fn load_config(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {:?}", config_path))?;
        Config::from_toml(&content)
    } else {
        tracing::debug!("No config at {:?}, using defaults", config_path);
        Config::from_toml("")
    }
}
