//! Remote store boundary.
//!
//! The pipeline needs three things from wherever artifacts end up:
//!
//! | Capability | Method |
//! |---|---|
//! | Non-recursive directory creation, "already exists" is success | [`RemoteSession::ensure_dir`] |
//! | Upload of a local file to a remote path | [`RemoteSession::put_file`] |
//! | Close, safe after any earlier failure | [`RemoteSession::close`] |
//!
//! Sessions are opened per upload and wrapped in a [`ScopedSession`], which
//! closes them when dropped. [`DirLocks`] serializes directory creation per
//! folder for stores whose `mkdir` is not atomic.
//!
//! The production store is [`FsRemoteStore`], a directory tree (mounted share
//! or synced folder) addressed by `/`-separated paths.

pub mod fs_store;

pub use fs_store::{FsRemoteStore, FsSession};

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid remote path {0:?}")]
    InvalidPath(String),
    #[error("session is closed")]
    SessionClosed,
    #[error("remote operation failed: {0}")]
    Failed(String),
}

/// One authenticated connection, used for a single upload.
pub trait RemoteSession: Send + 'static {
    /// Create `path` if absent. Parents are not created.
    fn ensure_dir(&mut self, path: &str) -> Result<(), RemoteError>;

    /// Upload the file at `local` to `remote`, replacing any existing file.
    fn put_file(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// Release the connection. Must tolerate being called after a failure.
    fn close(&mut self);
}

/// Factory for sessions against one remote store.
pub trait RemoteStore: Send + Sync {
    type Session: RemoteSession;

    /// Open and authenticate a new session.
    fn connect(&self) -> Result<Self::Session, RemoteError>;

    /// Whether concurrent `ensure_dir` calls on the same path are safe.
    fn atomic_mkdir(&self) -> bool {
        true
    }
}

/// A session that is closed exactly once, when dropped.
#[derive(Debug)]
pub struct ScopedSession<S: RemoteSession> {
    inner: S,
}

impl<S: RemoteSession> ScopedSession<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: RemoteSession> Deref for ScopedSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<S: RemoteSession> DerefMut for ScopedSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: RemoteSession> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Per-key mutexes guarding directory creation.
///
/// Keys are `/{owner}/{folder}` paths. An entry lives only while some caller
/// holds or waits on its lock, so the map stays as small as the set of folders
/// being published to right now.
#[derive(Debug, Default)]
pub struct DirLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DirLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Clones are only taken under the map lock, so a count of two (map + ours)
        // means nobody else is waiting on this key.
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) == 2 {
            map.remove(key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
