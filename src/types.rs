//! Shared request types used across the upload pipeline.
//!
//! These are created fresh per upload and discarded when the request
//! completes; nothing here outlives a request.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag the HTTP layer flips when a client goes away.
///
/// Only the optimization and staging phases look at it; an in-progress
/// publish always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The caller's thumbnail constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FitPolicy {
    /// Resize to a pixel width, optionally bounded in height. One encode.
    ByDimension {
        target_width: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_height: Option<u32>,
    },
    /// Search width and quality for a thumbnail near a byte budget.
    BySize { target_bytes: u64 },
}

impl FitPolicy {
    pub fn by_width(target_width: u32) -> Self {
        Self::ByDimension {
            target_width,
            target_height: None,
        }
    }

    pub fn by_size(target_bytes: u64) -> Self {
        Self::BySize { target_bytes }
    }

    /// Clamp the dimension-mode width to `max_width`.
    pub fn capped(self, max_width: u32) -> Self {
        match self {
            Self::ByDimension {
                target_width,
                target_height,
            } => Self::ByDimension {
                target_width: target_width.min(max_width),
                target_height,
            },
            other => other,
        }
    }
}

/// How the stored filename is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    /// Append a monotonic stamp so the name never collides with an existing file.
    #[default]
    Unique,
    /// Keep the sanitized client name, overwriting a prior upload of that name.
    Replace,
}

/// One decoded upload, as handed over by the HTTP layer or the CLI.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner: String,
    pub folder: String,
    /// Client-supplied filename; sanitized before use.
    pub filename: String,
    pub bytes: Vec<u8>,
    pub policy: FitPolicy,
    pub naming: NamingPolicy,
}
