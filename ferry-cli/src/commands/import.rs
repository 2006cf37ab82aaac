use anyhow::{bail, Context, Result};
use bytes::Bytes;
use ferry::security::{Principal, Role, RolePermissionEvaluator};
use ferry::staging::StagingManager;
use ferry::transfer::{CommitRequest, TransferService};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::open_store;

/// Parse repeated `FROM=TO` arguments into a mapping
pub fn parse_mappings(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut mapped = BTreeMap::new();
    for entry in raw {
        let Some((from, to)) = entry.split_once('=') else {
            bail!("Invalid mapping '{}', expected FROM=TO", entry);
        };
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            bail!("Invalid mapping '{}', expected FROM=TO", entry);
        }
        if mapped.insert(from.to_string(), to.to_string()).is_some() {
            bail!("User '{}' is mapped more than once", from);
        }
    }
    Ok(mapped)
}

/// Prepare and commit an archive file against the local store
pub async fn run_import(
    config_path: &Path,
    input: &Path,
    expect_key: &str,
    mappings: &[String],
    project_key: Option<String>,
) -> Result<()> {
    let mapped_users = parse_mappings(mappings)?;
    let (config, store) = open_store(config_path)?;
    let bytes = std::fs::read(input).with_context(|| format!("Failed to read {:?}", input))?;

    // Private staging root: a running server purges its own root on startup.
    let staging_dir = tempfile::tempdir().context("Failed to create staging directory")?;
    let staging = StagingManager::new(staging_dir.path(), 1)?;
    let service = TransferService::new(
        store,
        staging,
        Arc::new(RolePermissionEvaluator),
        config.staging.unpack_limits(),
    );
    let operator = Principal::new(config.security.default_login.clone(), &[Role::Admin]);

    let prepared = service
        .prepare_import(&operator, Bytes::from(bytes), expect_key)
        .await?;
    for warning in &prepared.warnings {
        tracing::warn!("{}", warning);
    }

    let missing: Vec<&String> = prepared
        .roster
        .iter()
        .filter(|u| !mapped_users.contains_key(*u))
        .collect();
    if !missing.is_empty() {
        service.abandon_import(&operator, &prepared.token).await?;
        bail!(
            "Unmapped archive users: {}. Pass --map USER=LOGIN for each (known logins: {})",
            missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "),
            prepared.destination_users.join(", ")
        );
    }

    let request = CommitRequest {
        mapped_users,
        project_key,
    };
    let imported = service
        .commit_import(&operator, &prepared.token, request)
        .await?;

    println!("{}", serde_json::to_string_pretty(&imported)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mappings() {
        let raw = vec!["u1=alice".to_string(), " u2 = bob ".to_string()];
        let mapped = parse_mappings(&raw).unwrap();
        assert_eq!(mapped.get("u1").map(String::as_str), Some("alice"));
        assert_eq!(mapped.get("u2").map(String::as_str), Some("bob"));
    }

    #[test]
    fn test_parse_mappings_rejects_bad_entries() {
        assert!(parse_mappings(&["u1".to_string()]).is_err());
        assert!(parse_mappings(&["=alice".to_string()]).is_err());
        assert!(parse_mappings(&["u1=a".to_string(), "u1=b".to_string()]).is_err());
    }
}
