//! Project archive transfer for multi-tenant ML project servers.
//!
//! Ferry moves a project (metadata, datasets, models and test suites)
//! between instances as a single portable archive:
//!
//! - **Export**: a live project is assembled into an [`archive::Archive`]
//!   and encoded as deterministic tar + zstd bytes.
//! - **Import**, in two phases: *prepare* unpacks an upload into an
//!   isolated staging workspace and reports the archive's user roster;
//!   *commit* applies a caller-supplied identity mapping and persists
//!   everything in one transaction. The staging workspace is always
//!   reclaimed afterwards.
//!
//! ```no_run
//! use ferry::archive::UnpackLimits;
//! use ferry::security::{Principal, Role, RolePermissionEvaluator};
//! use ferry::staging::StagingManager;
//! use ferry::transfer::{CommitRequest, TransferService};
//! use ferry_storage::SqliteStore;
//! use std::sync::Arc;
//!
//! # async fn example(bytes: bytes::Bytes) -> ferry::Result<()> {
//! let store = Arc::new(SqliteStore::open("./data/ferry.db")?);
//! let staging = StagingManager::new("./data/staging", 16)?;
//! let service = TransferService::new(
//!     store,
//!     staging,
//!     Arc::new(RolePermissionEvaluator),
//!     UnpackLimits::default(),
//! );
//!
//! let admin = Principal::new("admin", &[Role::Admin]);
//! let prepared = service.prepare_import(&admin, bytes, "credit-scoring").await?;
//!
//! let mut request = CommitRequest::default();
//! for user in &prepared.roster {
//!     request.mapped_users.insert(user.clone(), "admin".to_string());
//! }
//! let imported = service.commit_import(&admin, &prepared.token, request).await?;
//! println!("imported project {}", imported.id);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod security;
pub mod staging;
pub mod transfer;

pub use error::{Error, ErrorKind, Result};
