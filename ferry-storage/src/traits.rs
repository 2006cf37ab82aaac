//! Core store trait definitions.
//!
//! [`EntityStore`] is the persistence collaborator used by the transfer
//! pipeline. Reads go straight through the store; every write happens inside
//! a [`StoreTransaction`] so that a multi-entity import becomes visible all
//! at once or not at all.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::{
    Dataset, Model, NewDataset, NewModel, NewProject, NewSuite, Project, ProjectId,
    ProjectUpdate, Suite, User,
};

/// Unified store trait for projects and their artifacts.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the HTTP layer shares one store
/// across all request tasks.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Start a write transaction.
    ///
    /// The transaction holds exclusive write access until it is committed or
    /// dropped. Dropping without [`StoreTransaction::commit`] rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>>;

    /// Fetch a project by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the project does not exist.
    async fn get_project(&self, id: ProjectId) -> Result<Project>;

    /// Fetch a project by its unique key.
    async fn find_project_by_key(&self, key: &str) -> Result<Option<Project>>;

    /// List all projects ordered by id.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Datasets of a project, ordered by id.
    async fn list_datasets(&self, project_id: ProjectId) -> Result<Vec<Dataset>>;

    /// Raw dataset content.
    async fn dataset_content(&self, dataset_id: &str) -> Result<Bytes>;

    /// Models of a project, ordered by id.
    async fn list_models(&self, project_id: ProjectId) -> Result<Vec<Model>>;

    /// Raw serialized model content.
    async fn model_content(&self, model_id: &str) -> Result<Bytes>;

    /// Suites of a project, ordered by id.
    async fn list_suites(&self, project_id: ProjectId) -> Result<Vec<Suite>>;

    /// Look up a user account.
    async fn find_user(&self, login: &str) -> Result<Option<User>>;

    /// All user logins, sorted.
    async fn list_user_logins(&self) -> Result<Vec<String>>;

    /// Get a human-readable name for this store backend.
    fn backend_name(&self) -> &'static str;
}

/// An open write transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn create_project(&mut self, project: NewProject) -> Result<Project>;

    async fn update_project(&mut self, id: ProjectId, update: ProjectUpdate) -> Result<Project>;

    async fn create_dataset(&mut self, dataset: NewDataset) -> Result<Dataset>;

    async fn create_model(&mut self, model: NewModel) -> Result<Model>;

    async fn create_suite(&mut self, suite: NewSuite) -> Result<Suite>;

    /// Create or replace a user account.
    async fn upsert_user(&mut self, user: User) -> Result<()>;

    /// Make every write of this transaction durable and visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this transaction.
    ///
    /// Equivalent to dropping the transaction, but reports rollback errors.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
