//! Export: live project -> archive bytes.

use ferry_storage::{EntityStore, ProjectId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::archive::{
    self, is_valid_entity_id, Archive, DatasetRecord, ModelRecord, ProjectRecord, SuiteRecord,
    SuiteTestRecord,
};
use crate::error::{Error, Result};

/// Content type announced for exported archives.
pub const ARCHIVE_CONTENT_TYPE: &str = "binary/octet-stream";

pub struct ExportAssembler {
    store: Arc<dyn EntityStore>,
}

impl ExportAssembler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Read a project's durable state into an [`Archive`].
    ///
    /// Archive-local ids are the store ids; suite ids are the numeric suite
    /// id rendered as a string.
    pub async fn assemble(&self, project_id: ProjectId, exported_by: Option<&str>) -> Result<Archive> {
        let project = self.store.get_project(project_id).await.map_err(|e| {
            if e.is_not_found() {
                Error::ProjectNotFound(project_id.to_string())
            } else {
                Error::Persistence(e)
            }
        })?;

        let mut archive = Archive::new(
            ProjectRecord {
                key: project.key.clone(),
                name: project.name.clone(),
                description: project.description.clone(),
                owner: project.owner.clone(),
                guests: project.guests.clone(),
            },
            exported_by.map(str::to_string),
        );

        for dataset in self.store.list_datasets(project_id).await? {
            exportable_id(&dataset.id)?;
            let content = self.store.dataset_content(&dataset.id).await?;
            archive.add_dataset(
                DatasetRecord {
                    id: dataset.id,
                    name: dataset.name,
                    owner: dataset.owner,
                    target: dataset.target,
                    column_types: dataset.column_types,
                },
                content,
            );
        }

        for model in self.store.list_models(project_id).await? {
            exportable_id(&model.id)?;
            let content = self.store.model_content(&model.id).await?;
            archive.add_model(
                ModelRecord {
                    id: model.id,
                    name: model.name,
                    owner: model.owner,
                    language: model.language,
                    language_version: model.language_version,
                    feature_names: model.feature_names,
                    classification_labels: model.classification_labels,
                },
                content,
            );
        }

        let dataset_ids: BTreeSet<String> = archive.datasets.keys().cloned().collect();
        let model_ids: BTreeSet<String> = archive.models.keys().cloned().collect();
        for suite in self.store.list_suites(project_id).await? {
            let tests = suite
                .tests
                .into_iter()
                .map(|test| SuiteTestRecord {
                    dataset: keep_local_ref(test.dataset, &dataset_ids, &suite.name),
                    model: keep_local_ref(test.model, &model_ids, &suite.name),
                    name: test.name,
                    test_id: test.test_id,
                    params: test.params,
                })
                .collect();
            archive.add_suite(SuiteRecord {
                id: suite.id.to_string(),
                name: suite.name,
                tests,
            });
        }

        Ok(archive)
    }

    /// Assemble and encode a project. Side-effect free.
    pub async fn export(&self, project_id: ProjectId, exported_by: Option<&str>) -> Result<Vec<u8>> {
        let archive = self.assemble(project_id, exported_by).await?;
        let key = archive.project_key().to_string();
        let bytes = tokio::task::spawn_blocking(move || archive::encode_to_vec(&archive))
            .await
            .map_err(|e| Error::Internal(format!("Encoding task failed: {}", e)))??;

        info!(project_id, project_key = %key, size = bytes.len(), "Project exported");
        Ok(bytes)
    }
}

fn exportable_id(id: &str) -> Result<()> {
    if is_valid_entity_id(id) {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "Entity id '{}' cannot be used in an archive",
            id
        )))
    }
}

/// References to artifacts outside the project cannot travel with it.
fn keep_local_ref(reference: Option<String>, local: &BTreeSet<String>, suite: &str) -> Option<String> {
    match reference {
        Some(id) if local.contains(&id) => Some(id),
        Some(id) => {
            warn!(suite, reference = %id, "Dropping reference to an artifact outside the project");
            None
        }
        None => None,
    }
}
