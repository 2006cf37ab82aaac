//! Instance license.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureFlag {
    /// Per-user authentication
    Auth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub features: BTreeMap<FeatureFlag, bool>,
    #[serde(default)]
    pub license_problem: Option<String>,
    #[serde(default)]
    pub plan_code: Option<String>,
    #[serde(default)]
    pub plan_name: Option<String>,
    #[serde(default)]
    pub project_limit: Option<u32>,
    #[serde(default)]
    pub user_limit: Option<u32>,
}

impl License {
    /// No license installed.
    pub fn none() -> Self {
        Self {
            id: None,
            active: false,
            expires_on: None,
            features: BTreeMap::new(),
            license_problem: Some("No license installed".to_string()),
            plan_code: None,
            plan_name: None,
            project_limit: None,
            user_limit: None,
        }
    }

    /// Active and not past its expiry.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_on.map(|exp| exp > now).unwrap_or(true)
    }

    pub fn has_feature(&self, flag: FeatureFlag) -> bool {
        self.features.get(&flag).copied().unwrap_or(false)
    }

    /// Read a license JSON file; a missing file means no license.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "License file not found, running unlicensed");
            return Ok(Self::none());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read license file {}", path.display()))?;
        let license: License = serde_json::from_str(&content)
            .with_context(|| format!("Invalid license file {}", path.display()))?;
        info!(
            plan = license.plan_code.as_deref().unwrap_or("-"),
            active = license.active,
            "License loaded"
        );
        Ok(license)
    }
}

/// Holds the current license; read on every request.
pub struct LicenseService {
    current: RwLock<License>,
}

impl LicenseService {
    pub fn new(license: License) -> Self {
        Self {
            current: RwLock::new(license),
        }
    }

    /// Load from `path`, or run unlicensed when no path is configured.
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        let license = match path {
            Some(path) => License::load(path)?,
            None => License::none(),
        };
        Ok(Self::new(license))
    }

    pub fn current(&self) -> License {
        self.current.read().clone()
    }

    pub fn replace(&self, license: License) {
        *self.current.write() = license;
    }
}
