//! Project transfer pipeline.
//!
//! [`TransferService`] is the entry point used by the HTTP API and the CLI.
//! It authorizes the caller, then delegates to:
//!
//! - [`ImportNegotiator`]: stage an uploaded archive and report the roster
//! - [`ImportCommitter`]: persist a staged archive under an identity mapping
//! - [`ExportAssembler`]: turn a live project into archive bytes

mod committer;
mod export;
mod negotiator;

pub use committer::{CommitRequest, ImportCommitter, ImportedProject};
pub use export::{ExportAssembler, ARCHIVE_CONTENT_TYPE};
pub use negotiator::{EntityCounts, ImportNegotiator, PrepareResult};

use bytes::Bytes;
use ferry_storage::{EntityStore, Project, ProjectId};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::archive::UnpackLimits;
use crate::error::{Error, Result};
use crate::security::{PermissionEvaluator, Principal};
use crate::staging::{SessionToken, StagingManager};

pub struct TransferService {
    store: Arc<dyn EntityStore>,
    staging: Arc<StagingManager>,
    permissions: Arc<dyn PermissionEvaluator>,
    negotiator: ImportNegotiator,
    committer: ImportCommitter,
    assembler: ExportAssembler,
}

impl TransferService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        staging: Arc<StagingManager>,
        permissions: Arc<dyn PermissionEvaluator>,
        limits: UnpackLimits,
    ) -> Self {
        Self {
            negotiator: ImportNegotiator::new(staging.clone(), store.clone(), limits),
            committer: ImportCommitter::new(staging.clone(), store.clone()),
            assembler: ExportAssembler::new(store.clone()),
            store,
            staging,
            permissions,
        }
    }

    pub fn staging(&self) -> &Arc<StagingManager> {
        &self.staging
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    fn require_write(&self, principal: &Principal) -> Result<()> {
        if self.permissions.can_write(principal) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "'{}' may not import projects",
                principal.login
            )))
        }
    }

    pub async fn prepare_import(
        &self,
        principal: &Principal,
        archive: Bytes,
        project_key: &str,
    ) -> Result<PrepareResult> {
        self.require_write(principal)?;
        if project_key.trim().is_empty() {
            return Err(Error::InvalidRequest("projectKey is required".to_string()));
        }

        let start = Instant::now();
        let result = self.negotiator.prepare(archive, project_key).await;
        crate::metrics::record_prepare(&result, start.elapsed());
        result
    }

    pub async fn commit_import(
        &self,
        principal: &Principal,
        token: &SessionToken,
        request: CommitRequest,
    ) -> Result<ImportedProject> {
        self.require_write(principal)?;

        let start = Instant::now();
        let result = self.committer.commit(token, request).await;
        crate::metrics::record_commit(&result, start.elapsed());
        result
    }

    /// Abandon a staged import. Idempotent.
    pub async fn abandon_import(&self, principal: &Principal, token: &SessionToken) -> Result<()> {
        self.require_write(principal)?;

        let staging = self.staging.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || staging.destroy(&token))
            .await
            .map_err(|e| Error::Internal(format!("Staging cleanup task failed: {}", e)))?;
        info!(login = %principal.login, "Import abandoned");
        Ok(())
    }

    pub async fn export_project(&self, principal: &Principal, project_id: ProjectId) -> Result<Vec<u8>> {
        let start = Instant::now();
        let result = self.export_authorized(principal, project_id).await;
        crate::metrics::record_export(&result, start.elapsed());
        result
    }

    async fn export_authorized(&self, principal: &Principal, project_id: ProjectId) -> Result<Vec<u8>> {
        let project = self.store.get_project(project_id).await.map_err(|e| {
            if e.is_not_found() {
                Error::ProjectNotFound(project_id.to_string())
            } else {
                Error::Persistence(e)
            }
        })?;
        if !self.permissions.can_read_project(principal, &project) {
            return Err(Error::Forbidden(format!(
                "'{}' may not export project {}",
                principal.login, project_id
            )));
        }
        self.assembler
            .export(project_id, Some(principal.login.as_str()))
            .await
    }

    /// Projects the caller may read.
    pub async fn list_projects(&self, principal: &Principal) -> Result<Vec<Project>> {
        let projects = self.store.list_projects().await?;
        Ok(projects
            .into_iter()
            .filter(|p| self.permissions.can_read_project(principal, p))
            .collect())
    }
}
