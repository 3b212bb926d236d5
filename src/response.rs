//! HTTP boundary helpers: decoding upload metadata and encoding responses.
//!
//! The browser uploader sends a multipart form with a `file` part and a
//! `metadata` JSON part:
//!
//! ```json
//! {"username": "alice", "folder": "trip",
//!  "compression_method": "size", "target_width": 1600, "target_size": 1048576}
//! ```
//!
//! Responses are `{"success": true, "path": …, "thumbnailPath": …}` or
//! `{"success": false, "error": …, "stage": …}`, with the status code from
//! [`UploadError::status_code`].

use crate::types::{FitPolicy, NamingPolicy, UploadRequest};
use crate::upload::{UploadError, UploadOutcome};
use crate::publish::PublishStage;
use serde::{Deserialize, Serialize};

/// Dimension-mode width when the client sends none.
pub const DEFAULT_TARGET_WIDTH: u32 = 1600;

/// The uploader's `metadata` form part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadMetadata {
    pub username: Option<String>,
    pub folder: Option<String>,
    /// `"size"` or `"dimension"`; absent means dimension.
    pub compression_method: Option<String>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
    /// Byte budget for size mode.
    pub target_size: Option<u64>,
    /// Overwrite an existing file of the same name instead of stamping it.
    pub replace: bool,
}

impl UploadMetadata {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The fit policy this metadata asks for.
    pub fn policy(&self) -> Result<FitPolicy, UploadError> {
        match self.compression_method.as_deref().unwrap_or("dimension") {
            "dimension" => Ok(FitPolicy::ByDimension {
                target_width: self.target_width.unwrap_or(DEFAULT_TARGET_WIDTH),
                target_height: self.target_height,
            }),
            "size" => self
                .target_size
                .map(FitPolicy::by_size)
                .ok_or(UploadError::MissingField("target_size")),
            _ => Err(UploadError::MissingField("compression_method")),
        }
    }

    /// Combine with the file part into a request.
    pub fn into_request(self, filename: &str, bytes: Vec<u8>) -> Result<UploadRequest, UploadError> {
        let policy = self.policy()?;
        let owner = required(self.username, "username")?;
        let folder = required(self.folder, "folder")?;
        if filename.trim().is_empty() {
            return Err(UploadError::MissingField("filename"));
        }
        if bytes.is_empty() {
            return Err(UploadError::MissingField("file"));
        }
        Ok(UploadRequest {
            owner,
            folder,
            filename: filename.to_string(),
            bytes,
            policy,
            naming: if self.replace {
                NamingPolicy::Replace
            } else {
                NamingPolicy::Unique
            },
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, UploadError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(UploadError::MissingField(field))
}

/// JSON body returned to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UploadResponse {
    #[serde(rename_all = "camelCase")]
    Success {
        success: bool,
        path: String,
        thumbnail_path: String,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        success: bool,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<PublishStage>,
    },
}

impl UploadResponse {
    pub fn from_result(result: &Result<UploadOutcome, UploadError>) -> (u16, Self) {
        match result {
            Ok(outcome) => (
                200,
                UploadResponse::Success {
                    success: true,
                    path: outcome.original_path.clone(),
                    thumbnail_path: outcome.thumbnail_path.clone(),
                },
            ),
            Err(e) => (
                e.status_code(),
                UploadResponse::Failure {
                    success: false,
                    error: e.to_string(),
                    stage: e.publish_stage(),
                },
            ),
        }
    }
}
