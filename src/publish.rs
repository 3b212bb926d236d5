//! Remote publisher: pushes one upload's two artifacts to the remote store.
//!
//! Order of operations for a single publish:
//!
//! ```text
//! 1. both local artifacts exist and are non-empty   else LocalArtifactMissing
//! 2. connect                                        else Connect
//! 3. ensure /{owner}, /{owner}/{folder}, …/thumbnails   failures logged, not fatal
//! 4. put original                                   else Transfer{stage: original}
//! 5. put thumbnail                                  else Transfer{stage: thumbnail}
//! ```
//!
//! The session is closed on every exit path. There is no rollback: a
//! thumbnail failure leaves the original in place. Each put runs on its own
//! thread and is bounded by the transfer timeout; a timed-out put keeps
//! running to completion in the background while the caller gets
//! [`PublishError::Timeout`], and the session closes once it finishes.

use crate::placement::ArtifactPlacementPlan;
use crate::remote::{DirLocks, RemoteError, RemoteSession, RemoteStore, ScopedSession};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Which artifact a transfer failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStage {
    Original,
    Thumbnail,
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishStage::Original => "original",
            PublishStage::Thumbnail => "thumbnail",
        })
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("local artifact missing or empty: {}", .0.display())]
    LocalArtifactMissing(PathBuf),
    #[error("could not open remote session: {0}")]
    Connect(#[source] RemoteError),
    #[error("{stage} transfer failed: {source}")]
    Transfer {
        stage: PublishStage,
        #[source]
        source: RemoteError,
    },
    #[error("{stage} transfer timed out after {}s", .after.as_secs_f64())]
    Timeout { stage: PublishStage, after: Duration },
}

impl PublishError {
    /// The failing transfer stage, if the error came from a transfer.
    pub fn stage(&self) -> Option<PublishStage> {
        match self {
            PublishError::Transfer { stage, .. } | PublishError::Timeout { stage, .. } => {
                Some(*stage)
            }
            PublishError::LocalArtifactMissing(_) | PublishError::Connect(_) => None,
        }
    }
}

/// What a successful publish did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub original_remote_path: String,
    pub thumbnail_remote_path: String,
    /// Directories whose creation failed without failing the publish.
    pub dir_failures: Vec<String>,
}

pub struct Publisher<'a, R: RemoteStore> {
    store: &'a R,
    dir_locks: &'a DirLocks,
    transfer_timeout: Duration,
}

type SharedSession<S> = Arc<Mutex<ScopedSession<S>>>;

impl<'a, R: RemoteStore> Publisher<'a, R> {
    pub fn new(store: &'a R, dir_locks: &'a DirLocks, transfer_timeout: Duration) -> Self {
        Self {
            store,
            dir_locks,
            transfer_timeout,
        }
    }

    /// Publish both artifacts according to `plan`.
    pub fn publish(
        &self,
        plan: &ArtifactPlacementPlan,
        original_local: &Path,
        thumbnail_local: &Path,
    ) -> Result<PublishReport, PublishError> {
        require_local(original_local)?;
        require_local(thumbnail_local)?;

        let session = self.store.connect().map_err(PublishError::Connect)?;
        let session: SharedSession<R::Session> =
            Arc::new(Mutex::new(ScopedSession::new(session)));

        let dir_failures = if self.store.atomic_mkdir() {
            ensure_dirs(&session, &plan.remote_dirs)
        } else {
            self.dir_locks
                .with_lock(plan.folder_dir(), || ensure_dirs(&session, &plan.remote_dirs))
        };

        self.transfer(
            &session,
            original_local,
            &plan.original_remote_path,
            PublishStage::Original,
        )?;
        self.transfer(
            &session,
            thumbnail_local,
            &plan.thumbnail_remote_path,
            PublishStage::Thumbnail,
        )?;

        Ok(PublishReport {
            original_remote_path: plan.original_remote_path.clone(),
            thumbnail_remote_path: plan.thumbnail_remote_path.clone(),
            dir_failures,
        })
    }

    fn transfer(
        &self,
        session: &SharedSession<R::Session>,
        local: &Path,
        remote: &str,
        stage: PublishStage,
    ) -> Result<(), PublishError> {
        let (tx, rx) = mpsc::channel();
        let worker_session = Arc::clone(session);
        let (local_path, remote_path) = (local.to_path_buf(), remote.to_string());

        thread::Builder::new()
            .name(format!("put-{stage}"))
            .spawn(move || {
                let result = worker_session
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .put_file(&local_path, &remote_path);
                // Release our handle first so a finished publish leaves no session open.
                drop(worker_session);
                let _ = tx.send(result);
            })
            .map_err(|e| PublishError::Transfer {
                stage,
                source: RemoteError::Io(e),
            })?;

        match rx.recv_timeout(self.transfer_timeout) {
            Ok(Ok(())) => {
                info!(stage = %stage, remote, "artifact published");
                Ok(())
            }
            Ok(Err(source)) => {
                warn!(stage = %stage, remote, error = %source, "artifact transfer failed");
                Err(PublishError::Transfer { stage, source })
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    stage = %stage,
                    remote,
                    timeout_secs = self.transfer_timeout.as_secs_f64(),
                    "artifact transfer timed out"
                );
                Err(PublishError::Timeout {
                    stage,
                    after: self.transfer_timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(PublishError::Transfer {
                stage,
                source: RemoteError::Failed("transfer worker exited without a result".into()),
            }),
        }
    }
}

fn require_local(path: &Path) -> Result<(), PublishError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(PublishError::LocalArtifactMissing(path.to_path_buf())),
    }
}

/// Create each directory in order. Returns the ones that failed.
fn ensure_dirs<S: RemoteSession>(session: &SharedSession<S>, dirs: &[String]) -> Vec<String> {
    let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
    let mut failures = Vec::new();
    for dir in dirs {
        match guard.ensure_dir(dir) {
            Ok(()) => debug!(dir = %dir, "remote directory ready"),
            Err(e) => {
                warn!(dir = %dir, error = %e, "could not ensure remote directory, continuing");
                failures.push(dir.clone());
            }
        }
    }
    failures
}
