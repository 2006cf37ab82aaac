//! SQLite-backed entity store.
//!
//! One connection guarded by an async mutex. A [`StoreTransaction`] keeps the
//! guard for its whole lifetime, so writes from concurrent imports are
//! serialized and a half-finished import is never observable by readers.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument, warn};

use crate::error::{Result, StorageError};
use crate::traits::{EntityStore, StoreTransaction};
use crate::types::{
    Dataset, Model, NewDataset, NewModel, NewProject, NewSuite, Project, ProjectId,
    ProjectUpdate, Suite, User,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    login         TEXT PRIMARY KEY,
    display_name  TEXT,
    roles         TEXT NOT NULL DEFAULT '[]',
    enabled       INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS projects (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    key          TEXT NOT NULL UNIQUE,
    name         TEXT NOT NULL,
    description  TEXT,
    owner        TEXT NOT NULL REFERENCES users(login),
    guests       TEXT NOT NULL DEFAULT '[]',
    created_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS datasets (
    id            TEXT PRIMARY KEY,
    project_id    INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name          TEXT NOT NULL,
    owner         TEXT NOT NULL REFERENCES users(login),
    target        TEXT,
    column_types  TEXT NOT NULL DEFAULT '{}',
    content       BLOB NOT NULL,
    size          INTEGER NOT NULL,
    created_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS models (
    id                     TEXT PRIMARY KEY,
    project_id             INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name                   TEXT NOT NULL,
    owner                  TEXT NOT NULL REFERENCES users(login),
    language               TEXT NOT NULL,
    language_version       TEXT NOT NULL,
    feature_names          TEXT NOT NULL DEFAULT '[]',
    classification_labels  TEXT NOT NULL DEFAULT '[]',
    content                BLOB NOT NULL,
    size                   INTEGER NOT NULL,
    created_at             INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS suites (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id  INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    tests       TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_datasets_project ON datasets(project_id);
CREATE INDEX IF NOT EXISTS idx_models_project ON models(project_id);
CREATE INDEX IF NOT EXISTS idx_suites_project ON suites(project_id);
"#;

/// SQLite-based entity store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("Cannot create {:?}: {}", parent, e)))?;
        }

        let conn = Connection::open(path)?;

        // WAL mode + integrity pragmas
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProject> {
        Ok(RawProject {
            id: row.get(0)?,
            key: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            owner: row.get(4)?,
            guests: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

struct RawProject {
    id: i64,
    key: String,
    name: String,
    description: Option<String>,
    owner: String,
    guests: String,
    created_at: i64,
}

impl RawProject {
    fn into_project(self) -> Result<Project> {
        Ok(Project {
            id: self.id,
            key: self.key,
            name: self.name,
            description: self.description,
            owner: self.owner,
            guests: from_json(&self.guests)?,
            created_at: from_millis(self.created_at),
        })
    }
}

const PROJECT_COLUMNS: &str = "id, key, name, description, owner, guests, created_at";

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

/// Current time truncated to the millisecond precision stored on disk.
fn now_millis() -> (i64, DateTime<Utc>) {
    let millis = Utc::now().timestamp_millis();
    (millis, from_millis(millis))
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn get_project_locked(conn: &Connection, id: ProjectId) -> Result<Project> {
    conn.query_row(
        &format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS),
        params![id],
        SqliteStore::project_from_row,
    )
    .optional()?
    .ok_or_else(|| StorageError::NotFound(format!("project {}", id)))?
    .into_project()
}

fn map_insert_error(err: rusqlite::Error, what: String) -> StorageError {
    let err = StorageError::Database(err);
    if err.is_conflict() {
        StorageError::Conflict(what)
    } else {
        err
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>> {
        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        debug!("Transaction started");
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }

    #[instrument(skip(self))]
    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        let conn = self.conn.lock().await;
        get_project_locked(&conn, id)
    }

    #[instrument(skip(self))]
    async fn find_project_by_key(&self, key: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE key = ?", PROJECT_COLUMNS),
                params![key],
                Self::project_from_row,
            )
            .optional()?;
        raw.map(RawProject::into_project).transpose()
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects ORDER BY id",
            PROJECT_COLUMNS
        ))?;
        let raws = stmt
            .query_map([], Self::project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawProject::into_project).collect()
    }

    #[instrument(skip(self))]
    async fn list_datasets(&self, project_id: ProjectId) -> Result<Vec<Dataset>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, owner, target, column_types, size, created_at
             FROM datasets WHERE project_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(id, project_id, name, owner, target, column_types, size, created_at)| {
                    Ok(Dataset {
                        id,
                        project_id,
                        name,
                        owner,
                        target,
                        column_types: from_json(&column_types)?,
                        size: size as u64,
                        created_at: from_millis(created_at),
                    })
                },
            )
            .collect()
    }

    async fn dataset_content(&self, dataset_id: &str) -> Result<Bytes> {
        let conn = self.conn.lock().await;
        let content: Option<Vec<u8>> = conn
            .query_row(
                "SELECT content FROM datasets WHERE id = ?",
                params![dataset_id],
                |row| row.get(0),
            )
            .optional()?;
        content
            .map(Bytes::from)
            .ok_or_else(|| StorageError::NotFound(format!("dataset {}", dataset_id)))
    }

    #[instrument(skip(self))]
    async fn list_models(&self, project_id: ProjectId) -> Result<Vec<Model>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, owner, language, language_version,
                    feature_names, classification_labels, size, created_at
             FROM models WHERE project_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    (
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ),
                    (
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ),
                    row.get::<_, i64>(8)?,
                    row.get::<_, i64>(9)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |((id, project_id, name, owner), (language, language_version, features, labels), size, created_at)| {
                    Ok(Model {
                        id,
                        project_id,
                        name,
                        owner,
                        language,
                        language_version,
                        feature_names: from_json(&features)?,
                        classification_labels: from_json(&labels)?,
                        size: size as u64,
                        created_at: from_millis(created_at),
                    })
                },
            )
            .collect()
    }

    async fn model_content(&self, model_id: &str) -> Result<Bytes> {
        let conn = self.conn.lock().await;
        let content: Option<Vec<u8>> = conn
            .query_row(
                "SELECT content FROM models WHERE id = ?",
                params![model_id],
                |row| row.get(0),
            )
            .optional()?;
        content
            .map(Bytes::from)
            .ok_or_else(|| StorageError::NotFound(format!("model {}", model_id)))
    }

    #[instrument(skip(self))]
    async fn list_suites(&self, project_id: ProjectId) -> Result<Vec<Suite>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, tests FROM suites WHERE project_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, project_id, name, tests)| {
                Ok(Suite {
                    id,
                    project_id,
                    name,
                    tests: from_json(&tests)?,
                })
            })
            .collect()
    }

    async fn find_user(&self, login: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                "SELECT login, display_name, roles, enabled FROM users WHERE login = ?",
                params![login],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(login, display_name, roles, enabled)| {
            Ok(User {
                login,
                display_name,
                roles: from_json(&roles)?,
                enabled,
            })
        })
        .transpose()
    }

    async fn list_user_logins(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT login FROM users ORDER BY login")?;
        let logins = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logins)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

/// Write transaction over the store's single connection.
///
/// Rolls back on drop unless committed.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction<'_> {
    #[instrument(skip(self, project), fields(key = %project.key))]
    async fn create_project(&mut self, project: NewProject) -> Result<Project> {
        let (millis, created_at) = now_millis();
        self.conn
            .execute(
                "INSERT INTO projects (key, name, description, owner, guests, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    &project.key,
                    &project.name,
                    &project.description,
                    &project.owner,
                    to_json(&project.guests)?,
                    millis
                ],
            )
            .map_err(|e| map_insert_error(e, format!("project key '{}'", project.key)))?;

        Ok(Project {
            id: self.conn.last_insert_rowid(),
            key: project.key,
            name: project.name,
            description: project.description,
            owner: project.owner,
            guests: project.guests,
            created_at,
        })
    }

    #[instrument(skip(self, update))]
    async fn update_project(&mut self, id: ProjectId, update: ProjectUpdate) -> Result<Project> {
        let mut project = get_project_locked(&self.conn, id)?;
        if let Some(name) = update.name {
            project.name = name;
        }
        if let Some(description) = update.description {
            project.description = Some(description);
        }
        if let Some(guests) = update.guests {
            project.guests = guests;
        }

        self.conn.execute(
            "UPDATE projects SET name = ?, description = ?, guests = ? WHERE id = ?",
            params![
                &project.name,
                &project.description,
                to_json(&project.guests)?,
                id
            ],
        )?;
        Ok(project)
    }

    #[instrument(skip(self, dataset), fields(id = %dataset.id, size = dataset.content.len()))]
    async fn create_dataset(&mut self, dataset: NewDataset) -> Result<Dataset> {
        let (millis, created_at) = now_millis();
        let size = dataset.content.len() as u64;
        self.conn
            .execute(
                "INSERT INTO datasets
                 (id, project_id, name, owner, target, column_types, content, size, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    &dataset.id,
                    dataset.project_id,
                    &dataset.name,
                    &dataset.owner,
                    &dataset.target,
                    to_json(&dataset.column_types)?,
                    dataset.content.as_ref(),
                    size as i64,
                    millis
                ],
            )
            .map_err(|e| map_insert_error(e, format!("dataset '{}'", dataset.id)))?;

        Ok(Dataset {
            id: dataset.id,
            project_id: dataset.project_id,
            name: dataset.name,
            owner: dataset.owner,
            target: dataset.target,
            column_types: dataset.column_types,
            size,
            created_at,
        })
    }

    #[instrument(skip(self, model), fields(id = %model.id, size = model.content.len()))]
    async fn create_model(&mut self, model: NewModel) -> Result<Model> {
        let (millis, created_at) = now_millis();
        let size = model.content.len() as u64;
        self.conn
            .execute(
                "INSERT INTO models
                 (id, project_id, name, owner, language, language_version,
                  feature_names, classification_labels, content, size, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    &model.id,
                    model.project_id,
                    &model.name,
                    &model.owner,
                    &model.language,
                    &model.language_version,
                    to_json(&model.feature_names)?,
                    to_json(&model.classification_labels)?,
                    model.content.as_ref(),
                    size as i64,
                    millis
                ],
            )
            .map_err(|e| map_insert_error(e, format!("model '{}'", model.id)))?;

        Ok(Model {
            id: model.id,
            project_id: model.project_id,
            name: model.name,
            owner: model.owner,
            language: model.language,
            language_version: model.language_version,
            feature_names: model.feature_names,
            classification_labels: model.classification_labels,
            size,
            created_at,
        })
    }

    #[instrument(skip(self, suite), fields(name = %suite.name))]
    async fn create_suite(&mut self, suite: NewSuite) -> Result<Suite> {
        self.conn.execute(
            "INSERT INTO suites (project_id, name, tests) VALUES (?, ?, ?)",
            params![suite.project_id, &suite.name, to_json(&suite.tests)?],
        )?;

        Ok(Suite {
            id: self.conn.last_insert_rowid(),
            project_id: suite.project_id,
            name: suite.name,
            tests: suite.tests,
        })
    }

    async fn upsert_user(&mut self, user: User) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO users (login, display_name, roles, enabled)
             VALUES (?, ?, ?, ?)",
            params![
                &user.login,
                &user.display_name,
                to_json(&user.roles)?,
                user.enabled
            ],
        )?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.conn.execute_batch("COMMIT")?;
        tx.finished = true;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.finished = true;
        tx.conn.execute_batch("ROLLBACK")?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Rollback on drop failed: {}", e);
            } else {
                debug!("Transaction rolled back on drop");
            }
        }
    }
}
