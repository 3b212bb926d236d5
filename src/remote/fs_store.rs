//! Remote store backed by a local directory tree.
//!
//! Remote paths are `/`-separated and resolved under `root`. Each upload is
//! written to its own hidden `.{name}.XXXXXX.part` sibling and renamed into
//! place, so a reader never sees a half-written artifact and concurrent puts
//! to one path never share a temporary file. The last rename wins.

use super::{RemoteError, RemoteSession, RemoteStore};
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsRemoteStore {
    root: PathBuf,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a file or directory exists at `remote`.
    pub fn contains(&self, remote: &str) -> bool {
        resolve(&self.root, remote).is_ok_and(|p| p.exists())
    }
}

impl RemoteStore for FsRemoteStore {
    type Session = FsSession;

    fn connect(&self) -> Result<FsSession, RemoteError> {
        if !self.root.is_dir() {
            return Err(RemoteError::Connect(format!(
                "remote root {} is not a directory",
                self.root.display()
            )));
        }
        debug!(root = %self.root.display(), "opened filesystem session");
        Ok(FsSession {
            root: self.root.clone(),
            open: true,
        })
    }
}

#[derive(Debug)]
pub struct FsSession {
    root: PathBuf,
    open: bool,
}

impl FsSession {
    fn target(&self, remote: &str) -> Result<PathBuf, RemoteError> {
        if !self.open {
            return Err(RemoteError::SessionClosed);
        }
        resolve(&self.root, remote)
    }
}

impl RemoteSession for FsSession {
    fn ensure_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        let dir = self.target(path)?;
        match fs::create_dir(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn put_file(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let dest = self.target(remote)?;
        let (Some(parent), Some(name)) = (dest.parent(), dest.file_name()) else {
            return Err(RemoteError::InvalidPath(remote.to_string()));
        };
        let mut source = File::open(local)?;
        // Removed on drop if anything below fails.
        let mut part = tempfile::Builder::new()
            .prefix(&format!(".{}.", name.to_string_lossy()))
            .suffix(".part")
            .tempfile_in(parent)?;

        io::copy(&mut source, part.as_file_mut())?;
        part.as_file().sync_all()?;
        part.persist(&dest).map_err(|e| e.error)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            debug!(root = %self.root.display(), "closed filesystem session");
        }
        self.open = false;
    }
}

/// Map a remote path onto `root`, rejecting anything that could escape it.
fn resolve(root: &Path, remote: &str) -> Result<PathBuf, RemoteError> {
    let mut path = root.to_path_buf();
    let mut depth = 0;
    for part in remote.split('/').filter(|p| !p.is_empty()) {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(c)), None) if !part.contains('\\') => path.push(c),
            _ => return Err(RemoteError::InvalidPath(remote.to_string())),
        }
        depth += 1;
    }
    if depth == 0 {
        return Err(RemoteError::InvalidPath(remote.to_string()));
    }
    Ok(path)
}
