//! Deterministic remote placement of the two upload artifacts.
//!
//! ```text
//! /{owner}                              ← remote_dirs[0]
//! /{owner}/{folder}                     ← remote_dirs[1]
//! /{owner}/{folder}/thumbnails          ← remote_dirs[2]
//! /{owner}/{folder}/{filename}          ← original
//! /{owner}/{folder}/thumbnails/tn_{filename}  ← thumbnail
//! ```
//!
//! Directories are listed parent first because remote directory creation is
//! not assumed to be recursive. Planning is a pure string function: no I/O,
//! and the filename is used exactly as given (it was sanitized upstream).

use serde::Serialize;

/// Name of the per-folder thumbnail directory.
pub const THUMBNAIL_DIR: &str = "thumbnails";

/// Prefix prepended to a filename to form its thumbnail name.
pub const THUMBNAIL_PREFIX: &str = "tn_";

/// Where an upload's artifacts go and which directories must exist first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPlacementPlan {
    /// Parent before child.
    pub remote_dirs: [String; 3],
    pub original_remote_path: String,
    pub thumbnail_remote_path: String,
}

impl ArtifactPlacementPlan {
    /// The `/{owner}/{folder}` directory, used as the per-folder lock key.
    pub fn folder_dir(&self) -> &str {
        &self.remote_dirs[1]
    }
}

/// Thumbnail filename for `filename`.
pub fn thumbnail_name(filename: &str) -> String {
    format!("{THUMBNAIL_PREFIX}{filename}")
}

/// Compose the placement plan for one upload.
pub fn plan(owner: &str, folder: &str, filename: &str) -> ArtifactPlacementPlan {
    let owner_dir = format!("/{owner}");
    let folder_dir = format!("{owner_dir}/{folder}");
    let thumb_dir = format!("{folder_dir}/{THUMBNAIL_DIR}");

    ArtifactPlacementPlan {
        original_remote_path: format!("{folder_dir}/{filename}"),
        thumbnail_remote_path: format!("{thumb_dir}/{}", thumbnail_name(filename)),
        remote_dirs: [owner_dir, folder_dir, thumb_dir],
    }
}
