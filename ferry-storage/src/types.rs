//! Entity records persisted by the store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric project identifier assigned by the store.
pub type ProjectId = i64;

/// A persisted project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Unique, human-readable key (e.g. `credit-scoring`)
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Login of the owning user
    pub owner: String,
    /// Logins of invited guests
    #[serde(default)]
    pub guests: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a project.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProject {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: String,
    pub guests: Vec<String>,
}

/// Fields a project update may change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub guests: Option<Vec<String>>,
}

/// Dataset metadata. Content is read separately via
/// [`EntityStore::dataset_content`](crate::EntityStore::dataset_content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub project_id: ProjectId,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub target: Option<String>,
    /// Column name -> column type (`numeric`, `category`, `text`)
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDataset {
    pub id: String,
    pub project_id: ProjectId,
    pub name: String,
    pub owner: String,
    pub target: Option<String>,
    pub column_types: BTreeMap<String, String>,
    pub content: Bytes,
}

/// Model metadata. Content is read separately via
/// [`EntityStore::model_content`](crate::EntityStore::model_content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub project_id: ProjectId,
    pub name: String,
    pub owner: String,
    pub language: String,
    pub language_version: String,
    #[serde(default)]
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub classification_labels: Vec<String>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewModel {
    pub id: String,
    pub project_id: ProjectId,
    pub name: String,
    pub owner: String,
    pub language: String,
    pub language_version: String,
    pub feature_names: Vec<String>,
    pub classification_labels: Vec<String>,
    pub content: Bytes,
}

/// One test inside a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteTest {
    pub name: String,
    /// Identifier of the test function (e.g. `ferry.testing.test_f1`)
    pub test_id: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Dataset id the test runs against
    #[serde(default)]
    pub dataset: Option<String>,
    /// Model id the test runs against
    #[serde(default)]
    pub model: Option<String>,
}

/// A persisted test suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    pub id: i64,
    pub project_id: ProjectId,
    pub name: String,
    pub tests: Vec<SuiteTest>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSuite {
    pub project_id: ProjectId,
    pub name: String,
    pub tests: Vec<SuiteTest>,
}

/// A destination-system user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub enabled: bool,
}
