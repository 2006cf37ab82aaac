//! Import phase 2: translate a staged archive and persist it atomically.

use bytes::Bytes;
use ferry_storage::{
    EntityStore, NewDataset, NewModel, NewProject, NewSuite, ProjectId, StorageError, SuiteTest,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{Archive, SuiteTestRecord};
use crate::error::{Error, Result};
use crate::staging::{SessionLease, SessionToken, StagingManager};

/// Caller-supplied commit parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    /// Archive-local user id -> destination login
    #[serde(default)]
    pub mapped_users: BTreeMap<String, String>,
    /// Import under a different key than the archive's
    #[serde(default)]
    pub project_key: Option<String>,
}

/// Identity of the project created by a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedProject {
    pub id: ProjectId,
    pub key: String,
    pub datasets: usize,
    pub models: usize,
    pub suites: usize,
}

/// Archive content rewritten against destination identities, blobs loaded.
struct Translated {
    project: NewProject,
    datasets: Vec<(String, NewDataset)>,
    models: Vec<(String, NewModel)>,
    suites: Vec<(String, Vec<SuiteTestRecord>)>,
}

pub struct ImportCommitter {
    staging: Arc<StagingManager>,
    store: Arc<dyn EntityStore>,
}

impl ImportCommitter {
    pub fn new(staging: Arc<StagingManager>, store: Arc<dyn EntityStore>) -> Self {
        Self { staging, store }
    }

    /// Persist the staged archive behind `token`.
    ///
    /// The session is destroyed whatever the outcome, except when it is
    /// busy with another commit.
    pub async fn commit(&self, token: &SessionToken, request: CommitRequest) -> Result<ImportedProject> {
        let lease = self.staging.acquire(token)?;
        let result = self.commit_held(&lease, request).await;

        if let Err(e) = &result {
            warn!(token = %token, error = %e, "Import commit failed");
        }
        if let Err(e) = tokio::task::spawn_blocking(move || drop(lease)).await {
            warn!(token = %token, error = %e, "Staging cleanup task failed");
        }
        result
    }

    async fn commit_held(&self, lease: &SessionLease, request: CommitRequest) -> Result<ImportedProject> {
        let archive = lease.archive()?;

        let missing: Vec<String> = archive
            .roster()
            .into_iter()
            .filter(|u| !request.mapped_users.contains_key(u))
            .collect();
        if !missing.is_empty() {
            return Err(Error::IncompleteMapping { missing });
        }

        let mapping: HashMap<String, String> = archive
            .roster()
            .into_iter()
            .filter_map(|u| request.mapped_users.get(&u).map(|t| (u, t.clone())))
            .collect();
        let targets: BTreeSet<&String> = mapping.values().collect();
        for target in targets {
            match self.store.find_user(target).await? {
                Some(user) if user.enabled => {}
                _ => return Err(Error::UnknownUser(target.clone())),
            }
        }

        let key = request
            .project_key
            .unwrap_or_else(|| archive.project_key().to_string());
        if key.trim().is_empty() {
            return Err(Error::InvalidRequest("Project key must not be empty".to_string()));
        }
        if self.store.find_project_by_key(&key).await?.is_some() {
            return Err(Error::ProjectKeyConflict(key));
        }

        let translated = {
            let archive = Arc::clone(&archive);
            let key = key.clone();
            tokio::task::spawn_blocking(move || translate(&archive, &mapping, &key))
                .await
                .map_err(|e| Error::Internal(format!("Translation task failed: {}", e)))??
        };

        let imported = self.persist(translated).await?;
        info!(
            token = %lease.token(),
            project_id = imported.id,
            project_key = %imported.key,
            datasets = imported.datasets,
            models = imported.models,
            suites = imported.suites,
            "Import committed"
        );
        Ok(imported)
    }

    /// Write everything in one transaction. Any error drops the transaction,
    /// which rolls it back.
    async fn persist(&self, translated: Translated) -> Result<ImportedProject> {
        let Translated {
            project,
            datasets,
            models,
            suites,
        } = translated;
        let key = project.key.clone();

        let mut tx = self.store.begin().await?;
        let created = tx
            .create_project(project)
            .await
            .map_err(|e| conflict_or_persistence(e, &key))?;

        let mut dataset_ids = HashMap::new();
        for (local_id, mut dataset) in datasets {
            dataset.project_id = created.id;
            let stored = tx.create_dataset(dataset).await?;
            dataset_ids.insert(local_id, stored.id);
        }

        let mut model_ids = HashMap::new();
        for (local_id, mut model) in models {
            model.project_id = created.id;
            let stored = tx.create_model(model).await?;
            model_ids.insert(local_id, stored.id);
        }

        let suite_count = suites.len();
        for (name, tests) in suites {
            let tests = tests
                .into_iter()
                .map(|t| remap_test(t, &dataset_ids, &model_ids))
                .collect();
            tx.create_suite(NewSuite {
                project_id: created.id,
                name,
                tests,
            })
            .await?;
        }

        tx.commit().await?;
        debug!(project_id = created.id, "Import transaction committed");

        Ok(ImportedProject {
            id: created.id,
            key: created.key,
            datasets: dataset_ids.len(),
            models: model_ids.len(),
            suites: suite_count,
        })
    }
}

fn conflict_or_persistence(err: StorageError, key: &str) -> Error {
    if err.is_conflict() {
        Error::ProjectKeyConflict(key.to_string())
    } else {
        Error::Persistence(err)
    }
}

fn remap_test(
    test: SuiteTestRecord,
    datasets: &HashMap<String, String>,
    models: &HashMap<String, String>,
) -> SuiteTest {
    SuiteTest {
        name: test.name,
        test_id: test.test_id,
        params: test.params,
        dataset: test.dataset.and_then(|id| datasets.get(&id).cloned()),
        model: test.model.and_then(|id| models.get(&id).cloned()),
    }
}

fn map_user(mapping: &HashMap<String, String>, user: &str) -> Result<String> {
    mapping
        .get(user)
        .cloned()
        .ok_or_else(|| Error::IncompleteMapping {
            missing: vec![user.to_string()],
        })
}

fn read_blob(blob: &crate::archive::Blob, what: &str) -> Result<Bytes> {
    blob.read()
        .map_err(|e| Error::Internal(format!("Cannot read staged {}: {}", what, e)))
}

/// Rewrite user references and load blobs. Fresh ids are assigned to
/// datasets and models; project ids are filled in at persist time.
fn translate(archive: &Archive, mapping: &HashMap<String, String>, key: &str) -> Result<Translated> {
    let owner = map_user(mapping, &archive.project.owner)?;
    let mut guests = Vec::new();
    for guest in &archive.project.guests {
        let mapped = map_user(mapping, guest)?;
        if mapped != owner && !guests.contains(&mapped) {
            guests.push(mapped);
        }
    }

    let project = NewProject {
        key: key.to_string(),
        name: archive.project.name.clone(),
        description: archive.project.description.clone(),
        owner,
        guests,
    };

    let mut datasets = Vec::with_capacity(archive.datasets.len());
    for (local_id, entry) in &archive.datasets {
        let content = read_blob(&entry.blob, &format!("dataset '{}'", local_id))?;
        datasets.push((
            local_id.clone(),
            NewDataset {
                id: Uuid::new_v4().to_string(),
                project_id: 0,
                name: entry.record.name.clone(),
                owner: map_user(mapping, &entry.record.owner)?,
                target: entry.record.target.clone(),
                column_types: entry.record.column_types.clone(),
                content,
            },
        ));
    }

    let mut models = Vec::with_capacity(archive.models.len());
    for (local_id, entry) in &archive.models {
        let content = read_blob(&entry.blob, &format!("model '{}'", local_id))?;
        models.push((
            local_id.clone(),
            NewModel {
                id: Uuid::new_v4().to_string(),
                project_id: 0,
                name: entry.record.name.clone(),
                owner: map_user(mapping, &entry.record.owner)?,
                language: entry.record.language.clone(),
                language_version: entry.record.language_version.clone(),
                feature_names: entry.record.feature_names.clone(),
                classification_labels: entry.record.classification_labels.clone(),
                content,
            },
        ));
    }

    let suites = archive
        .suites
        .values()
        .map(|s| (s.name.clone(), s.tests.clone()))
        .collect();

    Ok(Translated {
        project,
        datasets,
        models,
        suites,
    })
}
