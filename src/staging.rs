//! Local scratch storage for artifacts awaiting publish.
//!
//! Each upload gets its own directory under the owner and folder, so two
//! requests staging the same filename never share a file:
//!
//! ```text
//! {root}/{owner}/{folder}/.upload-XXXXXX/{filename}
//! {root}/{owner}/{folder}/.upload-XXXXXX/thumbnails/tn_{filename}
//! ```
//!
//! Directories of failed publishes are left in place for inspection.

use crate::placement::{THUMBNAIL_DIR, thumbnail_name};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

/// Local paths of one upload's staged artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifacts {
    /// Directory owned by this upload alone.
    pub dir: PathBuf,
    pub original: PathBuf,
    pub thumbnail: PathBuf,
}

impl Staging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write both artifacts into a fresh per-upload directory.
    pub fn stage(
        &self,
        owner: &str,
        folder: &str,
        filename: &str,
        original: &[u8],
        thumbnail: &[u8],
    ) -> Result<StagedArtifacts, StagingError> {
        let folder_dir = self.root.join(owner).join(folder);
        create_dir(&folder_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(".upload-")
            .tempdir_in(&folder_dir)
            .map_err(|source| StagingError::Write {
                path: folder_dir.clone(),
                source,
            })?
            .keep();
        let thumb_dir = dir.join(THUMBNAIL_DIR);
        create_dir(&thumb_dir)?;

        let staged = StagedArtifacts {
            original: dir.join(filename),
            thumbnail: thumb_dir.join(thumbnail_name(filename)),
            dir,
        };
        write(&staged.original, original)?;
        write(&staged.thumbnail, thumbnail)?;
        debug!(
            original = %staged.original.display(),
            thumbnail = %staged.thumbnail.display(),
            "artifacts staged"
        );
        Ok(staged)
    }
}

impl StagedArtifacts {
    /// Delete this upload's directory. Failures are logged and otherwise ignored.
    pub fn remove(&self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            warn!(path = %self.dir.display(), error = %e, "could not remove staged files");
        }
    }
}

fn create_dir(path: &Path) -> Result<(), StagingError> {
    fs::create_dir_all(path).map_err(|source| StagingError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), StagingError> {
    fs::write(path, bytes).map_err(|source| StagingError::Write {
        path: path.to_path_buf(),
        source,
    })
}
