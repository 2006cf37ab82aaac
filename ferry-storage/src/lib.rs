//! Transactional entity store for ferry.
//!
//! This crate provides the [`EntityStore`] trait the transfer pipeline uses
//! to read live projects and to persist imported ones, plus a SQLite
//! implementation.
//!
//! # Transactions
//!
//! Writes go through a [`StoreTransaction`] obtained from
//! [`EntityStore::begin`]. Nothing written through a transaction is visible
//! to readers until [`StoreTransaction::commit`] succeeds; dropping the
//! transaction rolls everything back.
//!
//! ```no_run
//! use ferry_storage::{EntityStore, NewProject, SqliteStore, User};
//!
//! # async fn example() -> ferry_storage::Result<()> {
//! let store = SqliteStore::open("./data/ferry.db")?;
//!
//! let mut tx = store.begin().await?;
//! tx.upsert_user(User {
//!     login: "alice".to_string(),
//!     display_name: None,
//!     roles: vec!["ROLE_AI_CREATOR".to_string()],
//!     enabled: true,
//! })
//! .await?;
//! tx.create_project(NewProject {
//!     key: "credit-scoring".to_string(),
//!     name: "Credit scoring".to_string(),
//!     description: None,
//!     owner: "alice".to_string(),
//!     guests: vec![],
//! })
//! .await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod sqlite;
mod traits;
mod types;

pub use error::{Result, StorageError};
pub use sqlite::{SqliteStore, SqliteTransaction};
pub use traits::{EntityStore, StoreTransaction};
pub use types::{
    Dataset, Model, NewDataset, NewModel, NewProject, NewSuite, Project, ProjectId,
    ProjectUpdate, Suite, SuiteTest, User,
};

// Re-export bytes for convenience
pub use bytes::Bytes;
