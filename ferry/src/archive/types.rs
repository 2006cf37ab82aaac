//! Archive records and the in-memory entry tree.

use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Value of [`Manifest::format`] for archives written by this codec.
pub const ARCHIVE_FORMAT: &str = "ferry-archive";

/// Newest archive version this codec reads and the version it writes.
pub const ARCHIVE_VERSION: u32 = 1;

/// Root metadata, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: String,
    pub version: u32,
    pub project_key: String,
    /// Export timestamp (RFC 3339)
    pub exported_at: String,
    #[serde(default)]
    pub exported_by: Option<String>,
    /// Every user id referenced by any entry, sorted and distinct
    #[serde(default)]
    pub roster: Vec<String>,
}

/// Project metadata, stored as `project.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: String,
    #[serde(default)]
    pub guests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Archive-local id
    pub id: String,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Archive-local id
    pub id: String,
    pub name: String,
    pub owner: String,
    pub language: String,
    pub language_version: String,
    #[serde(default)]
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub classification_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteTestRecord {
    pub name: String,
    pub test_id: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Archive-local dataset id
    #[serde(default)]
    pub dataset: Option<String>,
    /// Archive-local model id
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteRecord {
    /// Archive-local id
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tests: Vec<SuiteTestRecord>,
}

/// Size and SHA-256 of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDigest {
    pub size: u64,
    pub sha256: String,
}

impl BlobDigest {
    pub fn of(data: &[u8]) -> Self {
        Self {
            size: data.len() as u64,
            sha256: hex::encode(Sha256::digest(data)),
        }
    }

    /// Digest a file without loading it into memory.
    pub fn of_file(path: &std::path::Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let size = io::copy(&mut file, &mut hasher)?;
        Ok(Self {
            size,
            sha256: hex::encode(hasher.finalize()),
        })
    }
}

/// Where a blob's bytes live.
#[derive(Debug, Clone)]
pub enum Blob {
    /// Held inline (decoded from bytes or built for export)
    Memory(Bytes),
    /// Spooled in a staging workspace
    File(PathBuf),
}

impl Blob {
    pub fn read(&self) -> io::Result<Bytes> {
        match self {
            Blob::Memory(bytes) => Ok(bytes.clone()),
            Blob::File(path) => std::fs::read(path).map(Bytes::from),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub record: DatasetRecord,
    pub digest: BlobDigest,
    pub blob: Blob,
}

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub record: ModelRecord,
    pub digest: BlobDigest,
    pub blob: Blob,
}

// Blob location is irrelevant; the digest stands in for the content.
impl PartialEq for DatasetEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record && self.digest == other.digest
    }
}

impl PartialEq for ModelEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record && self.digest == other.digest
    }
}

/// A decoded (or to-be-encoded) project archive.
///
/// Entries are keyed by archive-local id, so iteration order is the
/// canonical on-wire order.
#[derive(Debug, Clone)]
pub struct Archive {
    pub manifest: Manifest,
    pub project: ProjectRecord,
    pub datasets: BTreeMap<String, DatasetEntry>,
    pub models: BTreeMap<String, ModelEntry>,
    pub suites: BTreeMap<String, SuiteRecord>,
    /// Entry paths the decoder did not recognize
    pub skipped_entries: Vec<String>,
}

impl PartialEq for Archive {
    fn eq(&self, other: &Self) -> bool {
        self.manifest == other.manifest
            && self.project == other.project
            && self.datasets == other.datasets
            && self.models == other.models
            && self.suites == other.suites
    }
}

impl Archive {
    /// Start an archive for `project`, stamped with the current time.
    pub fn new(project: ProjectRecord, exported_by: Option<String>) -> Self {
        let manifest = Manifest {
            format: ARCHIVE_FORMAT.to_string(),
            version: ARCHIVE_VERSION,
            project_key: project.key.clone(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            exported_by,
            roster: Vec::new(),
        };
        let mut archive = Self {
            manifest,
            project,
            datasets: BTreeMap::new(),
            models: BTreeMap::new(),
            suites: BTreeMap::new(),
            skipped_entries: Vec::new(),
        };
        archive.manifest.roster = archive.roster();
        archive
    }

    pub fn project_key(&self) -> &str {
        &self.manifest.project_key
    }

    pub fn add_dataset(&mut self, record: DatasetRecord, content: Bytes) {
        let digest = BlobDigest::of(&content);
        self.datasets.insert(
            record.id.clone(),
            DatasetEntry {
                record,
                digest,
                blob: Blob::Memory(content),
            },
        );
        self.manifest.roster = self.roster();
    }

    pub fn add_model(&mut self, record: ModelRecord, content: Bytes) {
        let digest = BlobDigest::of(&content);
        self.models.insert(
            record.id.clone(),
            ModelEntry {
                record,
                digest,
                blob: Blob::Memory(content),
            },
        );
        self.manifest.roster = self.roster();
    }

    pub fn add_suite(&mut self, suite: SuiteRecord) {
        self.suites.insert(suite.id.clone(), suite);
    }

    /// Distinct user ids referenced by the project and its artifacts, sorted.
    pub fn roster(&self) -> Vec<String> {
        let mut users = BTreeSet::new();
        users.insert(self.project.owner.clone());
        users.extend(self.project.guests.iter().cloned());
        users.extend(self.datasets.values().map(|d| d.record.owner.clone()));
        users.extend(self.models.values().map(|m| m.record.owner.clone()));
        users.into_iter().collect()
    }

    /// True when the archive carries no datasets, models or suites.
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() && self.models.is_empty() && self.suites.is_empty()
    }
}

/// Whether `id` is usable as an archive-local id (and thus a path segment).
pub fn is_valid_entity_id(id: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("entity id pattern is valid"))
        .is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ProjectRecord {
        ProjectRecord {
            key: "churn".to_string(),
            name: "Churn".to_string(),
            description: None,
            owner: "bob".to_string(),
            guests: vec!["alice".to_string(), "bob".to_string()],
        }
    }

    #[test]
    fn test_roster_is_sorted_and_distinct() {
        let mut archive = Archive::new(project(), None);
        archive.add_dataset(
            DatasetRecord {
                id: "d1".to_string(),
                name: "train".to_string(),
                owner: "carol".to_string(),
                target: None,
                column_types: BTreeMap::new(),
            },
            Bytes::from_static(b"x"),
        );

        assert_eq!(archive.roster(), vec!["alice", "bob", "carol"]);
        assert_eq!(archive.manifest.roster, archive.roster());
    }

    #[test]
    fn test_entity_id_pattern() {
        assert!(is_valid_entity_id("ds_01-A"));
        assert!(is_valid_entity_id(&"a".repeat(64)));
        assert!(!is_valid_entity_id(&"a".repeat(65)));
        assert!(!is_valid_entity_id(""));
        assert!(!is_valid_entity_id(".."));
        assert!(!is_valid_entity_id("a/b"));
    }

    #[test]
    fn test_blob_digest() {
        let digest = BlobDigest::of(b"hello");
        assert_eq!(digest.size, 5);
        assert_eq!(
            digest.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
