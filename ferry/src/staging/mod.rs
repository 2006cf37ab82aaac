//! Import staging area.
//!
//! Every in-flight import owns one workspace directory under the staging
//! root, named after its server-generated [`SessionToken`]. The
//! [`StagingManager`] is the only component that creates or deletes those
//! directories.
//!
//! # Lifecycle
//!
//! ```text
//! allocate ──> PREPARING ──mark_ready──> READY ──acquire──> COMMITTING
//!                  │                       │                    │
//!                  └──── lease dropped ────┴── destroy/sweep ───┴──> destroyed
//! ```
//!
//! Work on a session happens through a [`SessionLease`]. Dropping a lease
//! destroys the session unless it was handed back with
//! [`SessionLease::mark_ready`]. A [`StagingManager::destroy`] that hits a
//! held session only marks it abandoned; the holder destroys it on release.

mod token;

pub use token::SessionToken;

use crate::archive::Archive;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session status. A destroyed session is simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Preparing,
    Ready,
    Committing,
}

struct SessionEntry {
    workspace: PathBuf,
    source_key: String,
    created_at: Instant,
    status: SessionStatus,
    abandoned: bool,
    archive: Option<Arc<Archive>>,
}

/// Read-only view of a live session.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub token: SessionToken,
    pub path: PathBuf,
    pub source_key: String,
    pub status: SessionStatus,
    pub age: Duration,
}

/// Owns the staging root and the session table.
pub struct StagingManager {
    root: PathBuf,
    max_sessions: usize,
    sessions: Mutex<HashMap<SessionToken, SessionEntry>>,
    /// Workspaces whose deletion failed; retried by [`sweep`](Self::sweep)
    pending_deletes: Mutex<Vec<PathBuf>>,
}

impl StagingManager {
    /// Open the staging root, purging workspaces left by a previous process.
    pub fn new(root: impl Into<PathBuf>, max_sessions: usize) -> Result<Arc<Self>> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::ResourceExhausted(format!(
                "Cannot create staging root {}: {}",
                root.display(),
                e
            ))
        })?;

        let manager = Arc::new(Self {
            root,
            max_sessions,
            sessions: Mutex::new(HashMap::new()),
            pending_deletes: Mutex::new(Vec::new()),
        });
        manager.purge_leftovers();
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, empty workspace in PREPARING state.
    ///
    /// `source_key` is recorded for diagnostics only.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when the session cap is reached or the workspace
    /// directory cannot be created.
    pub fn allocate(self: &Arc<Self>, source_key: &str) -> Result<SessionLease> {
        let (token, workspace) = {
            let mut sessions = self.sessions.lock();
            if sessions.len() >= self.max_sessions {
                return Err(Error::ResourceExhausted(format!(
                    "Too many concurrent staging sessions (max {})",
                    self.max_sessions
                )));
            }

            let mut token = SessionToken::generate();
            while sessions.contains_key(&token) {
                token = SessionToken::generate();
            }
            let workspace = self.root.join(token.as_str());
            sessions.insert(
                token.clone(),
                SessionEntry {
                    workspace: workspace.clone(),
                    source_key: source_key.to_string(),
                    created_at: Instant::now(),
                    status: SessionStatus::Preparing,
                    abandoned: false,
                    archive: None,
                },
            );
            crate::metrics::set_active_sessions(sessions.len());
            (token, workspace)
        };

        if let Err(e) = fs::create_dir(&workspace) {
            let mut sessions = self.sessions.lock();
            sessions.remove(&token);
            crate::metrics::set_active_sessions(sessions.len());
            return Err(Error::ResourceExhausted(format!(
                "Cannot create staging workspace: {}",
                e
            )));
        }

        debug!(token = %token, source_key, "Staging session allocated");
        Ok(SessionLease {
            manager: Arc::clone(self),
            token,
            workspace,
            archive: None,
            released: false,
        })
    }

    /// Take exclusive hold of a READY session for commit.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for unknown, destroyed or abandoned sessions;
    /// `SessionBusy` when another operation holds the session.
    pub fn acquire(self: &Arc<Self>, token: &SessionToken) -> Result<SessionLease> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(token).ok_or(Error::SessionNotFound)?;
        if entry.abandoned {
            return Err(Error::SessionNotFound);
        }
        if entry.status != SessionStatus::Ready {
            return Err(Error::SessionBusy);
        }
        entry.status = SessionStatus::Committing;

        Ok(SessionLease {
            manager: Arc::clone(self),
            token: token.clone(),
            workspace: entry.workspace.clone(),
            archive: entry.archive.clone(),
            released: false,
        })
    }

    /// Look up a live session.
    pub fn resolve(&self, token: &SessionToken) -> Result<Workspace> {
        let sessions = self.sessions.lock();
        match sessions.get(token) {
            Some(entry) if !entry.abandoned => Ok(Workspace {
                token: token.clone(),
                path: entry.workspace.clone(),
                source_key: entry.source_key.clone(),
                status: entry.status,
                age: entry.created_at.elapsed(),
            }),
            _ => Err(Error::SessionNotFound),
        }
    }

    /// Remove a session and its workspace. Idempotent, never fails.
    ///
    /// A session currently held by an operation is only marked abandoned;
    /// the holder destroys it when it lets go.
    pub fn destroy(&self, token: &SessionToken) {
        let workspace = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(token) {
                None => return,
                Some(entry) if entry.status != SessionStatus::Ready => {
                    entry.abandoned = true;
                    debug!(token = %token, status = ?entry.status, "Held staging session marked abandoned");
                    return;
                }
                Some(_) => {}
            }
            let entry = sessions.remove(token);
            crate::metrics::set_active_sessions(sessions.len());
            entry.map(|e| e.workspace)
        };

        if let Some(workspace) = workspace {
            self.delete_workspace(&workspace);
            crate::metrics::record_session_destroyed("abandoned");
            info!(token = %token, "Staging session destroyed");
        }
    }

    /// Reclaim READY sessions older than `max_age` and flag PREPARING ones
    /// past the same age as abandoned. Also retries failed deletions.
    ///
    /// Returns the number of sessions destroyed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let pending: Vec<PathBuf> = std::mem::take(&mut *self.pending_deletes.lock());
        for path in pending {
            self.delete_workspace(&path);
        }

        let expired: Vec<(SessionToken, PathBuf)> = {
            let mut sessions = self.sessions.lock();
            let mut expired = Vec::new();
            sessions.retain(|token, entry| {
                if entry.created_at.elapsed() < max_age {
                    return true;
                }
                match entry.status {
                    SessionStatus::Ready => {
                        expired.push((token.clone(), entry.workspace.clone()));
                        false
                    }
                    SessionStatus::Preparing => {
                        entry.abandoned = true;
                        true
                    }
                    SessionStatus::Committing => true,
                }
            });
            crate::metrics::set_active_sessions(sessions.len());
            expired
        };

        for (token, workspace) in &expired {
            self.delete_workspace(workspace);
            crate::metrics::record_session_destroyed("expired");
            info!(token = %token, "Expired staging session swept");
        }
        crate::metrics::record_swept(expired.len());
        expired.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match tokio::task::spawn_blocking(move || manager.sweep(max_age)).await {
                    Ok(swept) if swept > 0 => debug!(swept, "Staging sweep finished"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Staging sweep task failed"),
                }
            }
        })
    }

    /// Number of live sessions in the table.
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Number of workspace directories present on disk.
    pub fn workspace_count(&self) -> usize {
        fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop the table entry of a session whose lease was released and delete
    /// its workspace.
    fn release(&self, token: &SessionToken, reason: &'static str) {
        let workspace = {
            let mut sessions = self.sessions.lock();
            let entry = sessions.remove(token);
            crate::metrics::set_active_sessions(sessions.len());
            entry.map(|e| e.workspace)
        };
        if let Some(workspace) = workspace {
            self.delete_workspace(&workspace);
            crate::metrics::record_session_destroyed(reason);
            debug!(token = %token, reason, "Staging session released");
        }
    }

    /// Returns false when the deletion failed and was queued for retry.
    fn delete_workspace(&self, path: &Path) -> bool {
        match fs::remove_dir_all(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Workspace deletion failed, will retry");
                self.pending_deletes.lock().push(path.to_path_buf());
                false
            }
        }
    }

    /// Delete workspaces left by a previous process. Returns how many were
    /// actually removed.
    fn purge_leftovers(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        let mut purged = 0usize;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let is_workspace = name
                .to_str()
                .map(|n| SessionToken::parse(n).is_ok())
                .unwrap_or(false);
            if is_workspace && self.delete_workspace(&entry.path()) {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, root = %self.root.display(), "Purged leftover staging workspaces");
        }
        purged
    }
}

/// Scoped hold on one staging session.
///
/// Dropping the lease destroys the session unless
/// [`mark_ready`](Self::mark_ready) handed it back first.
pub struct SessionLease {
    manager: Arc<StagingManager>,
    token: SessionToken,
    workspace: PathBuf,
    archive: Option<Arc<Archive>>,
    released: bool,
}

impl SessionLease {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Decoded archive cached when the session became READY.
    pub fn archive(&self) -> Result<Arc<Archive>> {
        self.archive
            .clone()
            .ok_or_else(|| Error::Internal("Staging session has no decoded archive".to_string()))
    }

    /// Hand the session back as READY, caching its decoded archive.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if the session was abandoned meanwhile; the
    /// session is destroyed in that case.
    pub fn mark_ready(mut self, archive: Archive) -> Result<SessionToken> {
        {
            let mut sessions = self.manager.sessions.lock();
            match sessions.get_mut(&self.token) {
                Some(entry) if !entry.abandoned => {
                    entry.status = SessionStatus::Ready;
                    entry.archive = Some(Arc::new(archive));
                }
                _ => return Err(Error::SessionNotFound),
            }
        }
        self.released = true;
        Ok(self.token.clone())
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release(&self.token, "released");
        }
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("token", &self.token)
            .field("workspace", &self.workspace)
            .finish()
    }
}
