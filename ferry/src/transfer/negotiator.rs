//! Import phase 1: stage and inspect an uploaded archive.

use bytes::Bytes;
use ferry_storage::EntityStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::archive::{self, Archive, UnpackLimits};
use crate::error::{Error, Result};
use crate::staging::{SessionToken, StagingManager};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub datasets: usize,
    pub models: usize,
    pub suites: usize,
}

impl EntityCounts {
    pub fn of(archive: &Archive) -> Self {
        Self {
            datasets: archive.datasets.len(),
            models: archive.models.len(),
            suites: archive.suites.len(),
        }
    }
}

/// What the client needs to build an identity mapping.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResult {
    pub token: SessionToken,
    pub project_key: String,
    /// Archive-local user ids that must be mapped at commit
    pub roster: Vec<String>,
    pub warnings: Vec<String>,
    pub counts: EntityCounts,
    pub project_key_exists: bool,
    /// Logins available as mapping targets
    pub destination_users: Vec<String>,
}

const MAX_LISTED_SKIPPED: usize = 10;

/// Inspection results carried out of the blocking unpack task.
struct Inspection {
    roster: Vec<String>,
    counts: EntityCounts,
    skipped_entries: Vec<String>,
}

pub struct ImportNegotiator {
    staging: Arc<StagingManager>,
    store: Arc<dyn EntityStore>,
    limits: UnpackLimits,
}

impl ImportNegotiator {
    pub fn new(
        staging: Arc<StagingManager>,
        store: Arc<dyn EntityStore>,
        limits: UnpackLimits,
    ) -> Self {
        Self {
            staging,
            store,
            limits,
        }
    }

    /// Unpack `bytes` into a fresh staging session and report the roster.
    ///
    /// Nothing durable is written. On any failure the session is destroyed
    /// before the error is returned.
    pub async fn prepare(&self, bytes: Bytes, expected_key: &str) -> Result<PrepareResult> {
        let key_exists = self.store.find_project_by_key(expected_key).await?.is_some();
        let destination_users = self.store.list_user_logins().await?;

        // The lease lives inside the blocking task: if the caller goes away,
        // extraction still finishes before the workspace is removed.
        let staging = self.staging.clone();
        let limits = self.limits;
        let expected = expected_key.to_string();
        let staged = tokio::task::spawn_blocking(move || -> Result<(SessionToken, Inspection)> {
            let lease = staging.allocate(&expected)?;
            debug!(token = %lease.token(), size = bytes.len(), "Staging uploaded archive");
            archive::unpack(&bytes[..], lease.workspace(), limits)?;
            let archive = archive::decode_dir(lease.workspace())?;
            if archive.project_key() != expected {
                return Err(Error::ProjectKeyMismatch {
                    expected,
                    found: archive.project_key().to_string(),
                });
            }
            let inspection = Inspection {
                roster: archive.roster(),
                counts: EntityCounts::of(&archive),
                skipped_entries: archive.skipped_entries.clone(),
            };
            let token = lease.mark_ready(archive)?;
            Ok((token, inspection))
        })
        .await
        .map_err(|e| Error::Internal(format!("Staging task failed: {}", e)))?;
        let (token, inspection) = staged?;

        let warnings = build_warnings(expected_key, key_exists, &inspection, &destination_users);
        info!(
            token = %token,
            project_key = expected_key,
            roster = inspection.roster.len(),
            datasets = inspection.counts.datasets,
            models = inspection.counts.models,
            suites = inspection.counts.suites,
            "Import prepared"
        );

        Ok(PrepareResult {
            token,
            project_key: expected_key.to_string(),
            roster: inspection.roster,
            warnings,
            counts: inspection.counts,
            project_key_exists: key_exists,
            destination_users,
        })
    }
}

fn build_warnings(
    key: &str,
    key_exists: bool,
    inspection: &Inspection,
    destination_users: &[String],
) -> Vec<String> {
    let mut warnings = Vec::new();

    if key_exists {
        warnings.push(format!(
            "Project key '{}' already exists; choose another key at commit",
            key
        ));
    }

    let known: BTreeSet<&str> = destination_users.iter().map(String::as_str).collect();
    let unknown: Vec<&str> = inspection
        .roster
        .iter()
        .map(String::as_str)
        .filter(|u| !known.contains(u))
        .collect();
    if !unknown.is_empty() {
        warnings.push(format!(
            "Users not present on this instance: {}",
            unknown.join(", ")
        ));
    }

    if !inspection.skipped_entries.is_empty() {
        warnings.push(skipped_warning(&inspection.skipped_entries));
    }

    if inspection.counts == EntityCounts::default() {
        warnings.push("Archive contains no datasets, models or suites".to_string());
    }

    warnings
}

/// One warning for all skipped entries, naming at most a handful.
fn skipped_warning(skipped: &[String]) -> String {
    let shown: Vec<&str> = skipped
        .iter()
        .take(MAX_LISTED_SKIPPED)
        .map(String::as_str)
        .collect();
    let mut warning = format!(
        "Skipped {} unknown archive entries: {}",
        skipped.len(),
        shown.join(", ")
    );
    if skipped.len() > shown.len() {
        warning.push_str(&format!(" and {} more", skipped.len() - shown.len()));
    }
    warning
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings() {
        let inspection = Inspection {
            roster: vec!["u1".to_string(), "u2".to_string()],
            counts: EntityCounts::default(),
            skipped_entries: vec!["notes.txt".to_string()],
        };
        let warnings = build_warnings("proj", true, &inspection, &["u2".to_string()]);

        assert_eq!(warnings.len(), 4);
        assert!(warnings[0].contains("'proj' already exists"));
        assert_eq!(warnings[1], "Users not present on this instance: u1");
        assert!(warnings[2].contains("notes.txt"));
        assert!(warnings[3].contains("no datasets"));
    }

    #[test]
    fn test_skipped_entries_collapse_into_one_warning() {
        let skipped: Vec<String> = (0..500).map(|i| format!("junk/{}.txt", i)).collect();
        let inspection = Inspection {
            roster: vec!["u1".to_string()],
            counts: EntityCounts {
                datasets: 1,
                models: 0,
                suites: 0,
            },
            skipped_entries: skipped,
        };
        let warnings = build_warnings("proj", false, &inspection, &["u1".to_string()]);

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Skipped 500 unknown archive entries: junk/0.txt"));
        assert!(warnings[0].ends_with("and 490 more"));
    }

    #[test]
    fn test_no_warnings_for_clean_archive() {
        let inspection = Inspection {
            roster: vec!["u1".to_string()],
            counts: EntityCounts {
                datasets: 1,
                models: 0,
                suites: 0,
            },
            skipped_entries: vec![],
        };
        assert!(build_warnings("proj", false, &inspection, &["u1".to_string()]).is_empty());
    }
}
