//! Upload orchestration: one request from raw bytes to two remote artifacts.
//!
//! Each request walks a fixed state machine, and may fail out of any state:
//!
//! ```text
//! Validated → Probed → Optimized → StagedLocally → Published → Completed
//!     └──────────┴──────────┴────────────┴─────────────┴──→ Failed
//! ```
//!
//! | Stage | Work | Failure |
//! |---|---|---|
//! | Validated | owner/folder charset, payload size, filename, policy | `InvalidIdentifier`, `MissingField`, `PayloadTooLarge` |
//! | Probed | header probe on the codec pool | `Decode` |
//! | Optimized | decode check and passthrough below the floor, else [`fit_thumbnail`] | `Decode`, `Encode`, `Cancelled` |
//! | StagedLocally | write both artifacts to scratch | `Staging`, `Cancelled` |
//! | Published | [`Publisher::publish`] | `Publish` |
//! | Completed | optional scratch cleanup | none |
//!
//! Nothing touches the filesystem or the remote store before validation
//! passes. Cancellation is honored up to staging; once publishing starts the
//! request runs to completion.
//!
//! Batches run on a fixed number of worker threads
//! ([`effective_upload_workers`]), each pulling the next item only when its
//! previous upload has finished, so at most that many payloads and remote
//! sessions are live at once.

use crate::config::{ConfigError, ServiceConfig, effective_threads, effective_upload_workers};
use crate::imaging::{
    CodecError, ImageCodec, OptimizeError, SearchOutcome, SearchSettings, ThumbnailResult,
    fit_thumbnail,
};
use crate::naming::{NameError, next_stamp, sanitize_filename, unique_filename, validate_identifier};
use crate::placement;
use crate::publish::{PublishError, PublishStage, Publisher};
use crate::remote::{DirLocks, RemoteStore};
use crate::staging::{Staging, StagingError};
use crate::types::{CancelToken, FitPolicy, NamingPolicy, UploadRequest};
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid {field} {value:?}: only letters, digits and underscores are allowed")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("unsupported or corrupt image: {0}")]
    Decode(String),
    #[error("thumbnail encoding failed: {0}")]
    Encode(String),
    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// HTTP status for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            UploadError::InvalidIdentifier { .. }
            | UploadError::MissingField(_)
            | UploadError::Decode(_) => 400,
            UploadError::PayloadTooLarge { .. } => 413,
            UploadError::Publish(PublishError::Timeout { .. }) => 504,
            UploadError::Encode(_) | UploadError::Staging(_) | UploadError::Publish(_) => 500,
            UploadError::Cancelled => 499,
        }
    }

    /// Which transfer failed, for publish errors.
    pub fn publish_stage(&self) -> Option<PublishStage> {
        match self {
            UploadError::Publish(e) => e.stage(),
            _ => None,
        }
    }
}

impl From<NameError> for UploadError {
    fn from(e: NameError) -> Self {
        match e {
            NameError::InvalidIdentifier { field, value } => {
                UploadError::InvalidIdentifier { field, value }
            }
            NameError::InvalidFilename(value) => UploadError::InvalidIdentifier {
                field: "filename",
                value,
            },
            NameError::Missing(field) => UploadError::MissingField(field),
        }
    }
}

impl From<CodecError> for UploadError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Decode(msg) => UploadError::Decode(msg),
            CodecError::Encode(msg) => UploadError::Encode(msg),
        }
    }
}

impl From<OptimizeError> for UploadError {
    fn from(e: OptimizeError) -> Self {
        match e {
            OptimizeError::Codec(c) => c.into(),
            OptimizeError::Cancelled => UploadError::Cancelled,
        }
    }
}

/// Why an [`Uploader`] could not be built.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start codec workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    Validated,
    Probed,
    Optimized,
    StagedLocally,
    Published,
    Completed,
    Failed,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadStage::Validated => "validated",
            UploadStage::Probed => "probed",
            UploadStage::Optimized => "optimized",
            UploadStage::StagedLocally => "staged",
            UploadStage::Published => "published",
            UploadStage::Completed => "completed",
            UploadStage::Failed => "failed",
        })
    }
}

/// Thumbnail facts without the pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailSummary {
    pub width: u32,
    pub height: u32,
    pub quality: Option<u8>,
    pub byte_size: u64,
    pub attempts: u32,
    pub outcome: SearchOutcome,
}

impl From<&ThumbnailResult> for ThumbnailSummary {
    fn from(r: &ThumbnailResult) -> Self {
        Self {
            width: r.final_width,
            height: r.final_height,
            quality: r.final_quality.map(|q| q.value()),
            byte_size: r.final_byte_size,
            attempts: r.attempts_used,
            outcome: r.outcome,
        }
    }
}

/// A completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    /// Filename after sanitizing and the naming policy.
    pub stored_filename: String,
    pub original_path: String,
    pub thumbnail_path: String,
    pub thumbnail: ThumbnailSummary,
    /// Remote directories whose creation failed without failing the upload.
    pub dir_failures: Vec<String>,
}

/// Progress events, keyed by the client filename.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Stage {
        filename: String,
        stage: UploadStage,
    },
    Optimized {
        filename: String,
        thumbnail: ThumbnailSummary,
    },
    Completed {
        filename: String,
        outcome: UploadOutcome,
    },
    Failed {
        filename: String,
        /// Last stage reached before the failure.
        after: Option<UploadStage>,
        error: String,
        status: u16,
    },
}

struct Progress<'a> {
    filename: &'a str,
    events: Option<Sender<UploadEvent>>,
    reached: Option<UploadStage>,
}

impl Progress<'_> {
    fn send(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn advance(&mut self, stage: UploadStage) {
        info!(file = self.filename, stage = %stage, "upload stage reached");
        self.reached = Some(stage);
        if !matches!(stage, UploadStage::Optimized | UploadStage::Completed) {
            self.send(UploadEvent::Stage {
                filename: self.filename.to_string(),
                stage,
            });
        }
    }
}

/// Runs uploads against one codec and one remote store.
///
/// Codec work is dispatched to a private rayon pool so concurrent uploads
/// share a bounded number of CPU workers; remote transfers run on the
/// calling thread.
pub struct Uploader<C: ImageCodec, R: RemoteStore> {
    codec: C,
    store: R,
    config: ServiceConfig,
    settings: SearchSettings,
    staging: Staging,
    dir_locks: DirLocks,
    pool: rayon::ThreadPool,
    batch_workers: usize,
}

impl<C: ImageCodec, R: RemoteStore> Uploader<C, R> {
    /// Build an uploader. The config is validated first.
    pub fn new(codec: C, store: R, config: ServiceConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(effective_threads(&config.processing))
            .thread_name(|i| format!("codec-{i}"))
            .build()?;
        let batch_workers = effective_upload_workers(&config.processing);
        Ok(Self {
            settings: SearchSettings::from_config(&config.optimizer),
            staging: Staging::new(config.staging.resolved_dir()),
            codec,
            store,
            config,
            dir_locks: DirLocks::new(),
            pool,
            batch_workers,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    /// Run one upload to completion.
    pub fn upload(
        &self,
        request: UploadRequest,
        cancel: &CancelToken,
        events: Option<Sender<UploadEvent>>,
    ) -> Result<UploadOutcome, UploadError> {
        let client_name = request.filename.clone();
        let mut progress = Progress {
            filename: &client_name,
            events,
            reached: None,
        };

        match self.run(request, cancel, &mut progress) {
            Ok(outcome) => {
                progress.advance(UploadStage::Completed);
                progress.send(UploadEvent::Completed {
                    filename: client_name.clone(),
                    outcome: outcome.clone(),
                });
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    file = %client_name,
                    after = ?progress.reached,
                    status = e.status_code(),
                    error = %e,
                    "upload failed"
                );
                progress.send(UploadEvent::Failed {
                    filename: client_name.clone(),
                    after: progress.reached,
                    error: e.to_string(),
                    status: e.status_code(),
                });
                Err(e)
            }
        }
    }

    /// Run independent uploads in parallel. Results keep request order.
    pub fn upload_batch(
        &self,
        requests: Vec<UploadRequest>,
        cancel: &CancelToken,
        events: Option<Sender<UploadEvent>>,
    ) -> Vec<Result<UploadOutcome, UploadError>> {
        self.upload_each(requests, Ok::<UploadRequest, UploadError>, cancel, events)
    }

    /// Run a batch where each request is built by `prepare` on the worker
    /// that uploads it, so payloads are loaded only when a worker is free.
    ///
    /// At most [`effective_upload_workers`] items are in flight. Results keep
    /// item order; a `prepare` failure is returned in that item's slot.
    pub fn upload_each<T, E, F>(
        &self,
        items: Vec<T>,
        prepare: F,
        cancel: &CancelToken,
        events: Option<Sender<UploadEvent>>,
    ) -> Vec<Result<UploadOutcome, E>>
    where
        T: Send,
        E: From<UploadError> + Send,
        F: Fn(T) -> Result<UploadRequest, E> + Sync,
    {
        let total = items.len();
        let queue = Mutex::new(items.into_iter().enumerate());
        let (done_tx, done_rx) = mpsc::channel();

        std::thread::scope(|s| {
            for _ in 0..self.batch_workers.min(total) {
                let (queue, prepare, done_tx, events) =
                    (&queue, &prepare, done_tx.clone(), events.clone());
                s.spawn(move || {
                    loop {
                        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                        let Some((index, item)) = next else { break };
                        let result = prepare(item).and_then(|request| {
                            self.upload(request, cancel, events.clone())
                                .map_err(E::from)
                        });
                        let _ = done_tx.send((index, result));
                    }
                });
            }
        });
        drop(done_tx);

        let mut slots: Vec<Option<Result<UploadOutcome, E>>> = (0..total).map(|_| None).collect();
        for (index, result) in done_rx {
            slots[index] = Some(result);
        }
        // Every item was taken off the queue, or a worker panic propagated out of the scope.
        slots.into_iter().flatten().collect()
    }

    fn run(
        &self,
        request: UploadRequest,
        cancel: &CancelToken,
        progress: &mut Progress<'_>,
    ) -> Result<UploadOutcome, UploadError> {
        let UploadRequest {
            owner,
            folder,
            filename,
            bytes,
            policy,
            naming,
        } = request;

        // Validated
        validate_identifier("owner", &owner)?;
        validate_identifier("folder", &folder)?;
        if bytes.is_empty() {
            return Err(UploadError::MissingField("file"));
        }
        let limit = self.config.limits.max_upload_bytes;
        if bytes.len() as u64 > limit {
            return Err(UploadError::PayloadTooLarge {
                size: bytes.len() as u64,
                limit,
            });
        }
        let policy = validate_policy(policy)?.capped(self.config.limits.max_target_width);
        let clean = sanitize_filename(&filename)?;
        let stored = match naming {
            NamingPolicy::Unique => unique_filename(&clean, next_stamp()),
            NamingPolicy::Replace => clean,
        };
        progress.advance(UploadStage::Validated);

        // Probed
        check(cancel)?;
        let probe = self.pool.install(|| self.codec.probe(&bytes))?;
        progress.advance(UploadStage::Probed);

        // Optimized
        let thumbnail = if probe.encoded_byte_size < self.config.optimizer.optimize_floor_bytes {
            // The probe reads headers only; a corrupt body must still be a decode error.
            self.pool.install(|| self.codec.decode(&bytes).map(drop))?;
            ThumbnailResult::passthrough(bytes.clone(), &probe)
        } else {
            self.pool.install(|| {
                fit_thumbnail(&self.codec, &bytes, &probe, policy, &self.settings, cancel)
            })?
        };
        let summary = ThumbnailSummary::from(&thumbnail);
        info!(
            file = %stored,
            width = summary.width,
            height = summary.height,
            bytes = summary.byte_size,
            attempts = summary.attempts,
            outcome = ?summary.outcome,
            "thumbnail ready"
        );
        progress.advance(UploadStage::Optimized);
        progress.send(UploadEvent::Optimized {
            filename: progress.filename.to_string(),
            thumbnail: summary.clone(),
        });

        // StagedLocally
        check(cancel)?;
        let staged = self
            .staging
            .stage(&owner, &folder, &stored, &bytes, &thumbnail.bytes)?;
        drop(thumbnail);
        progress.advance(UploadStage::StagedLocally);

        // Published
        let plan = placement::plan(&owner, &folder, &stored);
        let report = Publisher::new(
            &self.store,
            &self.dir_locks,
            self.config.remote.transfer_timeout(),
        )
        .publish(&plan, &staged.original, &staged.thumbnail)?;
        progress.advance(UploadStage::Published);

        if self.config.staging.cleanup_on_success {
            staged.remove();
        }

        Ok(UploadOutcome {
            stored_filename: stored,
            original_path: report.original_remote_path,
            thumbnail_path: report.thumbnail_remote_path,
            thumbnail: summary,
            dir_failures: report.dir_failures,
        })
    }
}

fn validate_policy(policy: FitPolicy) -> Result<FitPolicy, UploadError> {
    match policy {
        FitPolicy::ByDimension { target_width: 0, .. } => {
            Err(UploadError::MissingField("target_width"))
        }
        FitPolicy::ByDimension {
            target_height: Some(0),
            ..
        } => Err(UploadError::MissingField("target_height")),
        FitPolicy::BySize { target_bytes: 0 } => Err(UploadError::MissingField("target_size")),
        valid => Ok(valid),
    }
}

fn check(cancel: &CancelToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        Err(UploadError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ImageProbe;
    use crate::imaging::RustCodec;
    use crate::imaging::backend::tests::ScriptedCodec;
    use crate::test_helpers::{MemoryStore, files_under, gradient_jpeg};
    use std::time::Duration;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn config(staging: &TempDir) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.staging.dir = Some(staging.path().to_path_buf());
        config.processing.max_processes = Some(2);
        config
    }

    fn request(owner: &str, filename: &str, bytes: Vec<u8>, policy: FitPolicy) -> UploadRequest {
        UploadRequest {
            owner: owner.to_string(),
            folder: "trip".to_string(),
            filename: filename.to_string(),
            bytes,
            policy,
            naming: NamingPolicy::Replace,
        }
    }

    fn large_probe() -> ImageProbe {
        ImageProbe {
            width: 4000,
            height: 3000,
            encoded_byte_size: 4 * 1024 * 1024,
        }
    }

    fn scripted(probe: ImageProbe) -> ScriptedCodec {
        ScriptedCodec::new(probe, |_, q| q as usize * 20_000)
    }

    fn count_entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    // =========================================================================
    // End-to-end scenarios
    // =========================================================================

    #[test]
    fn small_upload_reuses_original_as_thumbnail() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let uploader = Uploader::new(RustCodec::new(), store.clone(), config(&tmp)).unwrap();
        let jpeg = gradient_jpeg(800, 600, 85);
        assert!(jpeg.len() < 1024 * 1024);

        let outcome = uploader
            .upload(
                request("alice", "small.jpg", jpeg.clone(), FitPolicy::by_width(1600)),
                &CancelToken::new(),
                None,
            )
            .unwrap();

        assert_eq!(outcome.original_path, "/alice/trip/small.jpg");
        assert_eq!(outcome.thumbnail_path, "/alice/trip/thumbnails/tn_small.jpg");
        assert_eq!(outcome.thumbnail.outcome, SearchOutcome::Passthrough);
        assert_eq!(outcome.thumbnail.attempts, 0);
        assert_eq!(store.file(&outcome.thumbnail_path).unwrap(), jpeg);
        assert_eq!(store.file(&outcome.original_path).unwrap(), jpeg);
    }

    #[test]
    fn passthrough_skips_encoding() {
        let tmp = TempDir::new().unwrap();
        let codec = scripted(ImageProbe {
            encoded_byte_size: 500_000,
            ..large_probe()
        });
        let uploader = Uploader::new(codec, MemoryStore::new(), config(&tmp)).unwrap();
        uploader
            .upload(
                request("alice", "a.jpg", vec![7; 500_000], FitPolicy::by_size(100_000)),
                &CancelToken::new(),
                None,
            )
            .unwrap();
        assert!(uploader.codec.encode_calls().is_empty());
        // One decode to check the body, no encode.
        assert_eq!(*uploader.codec.decodes.lock().unwrap(), 1);
    }

    #[test]
    fn small_upload_with_corrupt_body_is_400() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let codec = ScriptedCodec::corrupt_body(ImageProbe {
            encoded_byte_size: 500_000,
            ..large_probe()
        });
        let uploader = Uploader::new(codec, store.clone(), config(&tmp)).unwrap();

        let err = uploader
            .upload(
                request("alice", "a.jpg", vec![7; 500_000], FitPolicy::by_width(800)),
                &CancelToken::new(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, UploadError::Decode(_)));
        assert_eq!(err.status_code(), 400);
        assert_eq!(store.connects(), 0);
        assert!(files_under(tmp.path()).is_empty());
    }

    #[test]
    fn large_upload_by_size_lands_in_band_or_exhausts() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let uploader = Uploader::new(scripted(large_probe()), store.clone(), config(&tmp)).unwrap();

        let outcome = uploader
            .upload(
                request("alice", "big.jpg", vec![1; 4 * 1024 * 1024], FitPolicy::by_size(1_048_576)),
                &CancelToken::new(),
                None,
            )
            .unwrap();

        let size = outcome.thumbnail.byte_size;
        assert!((943_718..=1_153_433).contains(&size) || outcome.thumbnail.attempts == 8);
        assert_eq!(
            store.file(&outcome.thumbnail_path).unwrap().len() as u64,
            size
        );
    }

    #[test]
    fn thumbnail_transfer_failure_reports_stage_and_keeps_original() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new().failing_put("/alice/trip/thumbnails/tn_a.jpg");
        let uploader = Uploader::new(scripted(large_probe()), store.clone(), config(&tmp)).unwrap();

        let err = uploader
            .upload(
                request("alice", "a.jpg", vec![1; 2 * 1024 * 1024], FitPolicy::by_width(800)),
                &CancelToken::new(),
                None,
            )
            .unwrap_err();

        assert_eq!(err.publish_stage(), Some(PublishStage::Thumbnail));
        assert_eq!(err.status_code(), 500);
        assert!(store.contains("/alice/trip/a.jpg"));
        assert!(!store.contains("/alice/trip/thumbnails/tn_a.jpg"));
        // Staged files of a failed publish stay for reconciliation.
        let staged = files_under(tmp.path());
        assert!(staged.iter().any(|p| p.ends_with("a.jpg")), "{staged:?}");
        assert!(staged.iter().any(|p| p.ends_with("thumbnails/tn_a.jpg")));
    }

    #[test]
    fn invalid_owner_fails_before_any_side_effect() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let uploader = Uploader::new(scripted(large_probe()), store.clone(), config(&tmp)).unwrap();

        let err = uploader
            .upload(
                request("bad name!", "a.jpg", vec![1; 10], FitPolicy::by_width(800)),
                &CancelToken::new(),
                None,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::InvalidIdentifier { field: "owner", .. }
        ));
        assert_eq!(err.status_code(), 400);
        assert_eq!(store.connects(), 0);
        assert!(store.dirs().is_empty());
        assert_eq!(count_entries(tmp.path()), 0);
        assert_eq!(*uploader.codec.decodes.lock().unwrap(), 0);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.optimizer.tolerance = 0.0;
        assert!(matches!(
            Uploader::new(scripted(large_probe()), MemoryStore::new(), cfg),
            Err(SetupError::Config(_))
        ));

        let mut cfg = config(&tmp);
        cfg.optimizer.min_quality = 95;
        assert!(matches!(
            Uploader::new(scripted(large_probe()), MemoryStore::new(), cfg),
            Err(SetupError::Config(_))
        ));
    }

    #[test]
    fn invalid_folder_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(scripted(large_probe()), MemoryStore::new(), config(&tmp)).unwrap();
        let mut req = request("alice", "a.jpg", vec![1], FitPolicy::by_width(800));
        req.folder = "../up".into();
        let err = uploader.upload(req, &CancelToken::new(), None).unwrap_err();
        assert!(matches!(
            err,
            UploadError::InvalidIdentifier { field: "folder", .. }
        ));
    }

    #[test]
    fn missing_fields_are_400() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(scripted(large_probe()), MemoryStore::new(), config(&tmp)).unwrap();
        let cases = [
            (request("", "a.jpg", vec![1], FitPolicy::by_width(800)), "owner"),
            (request("alice", "", vec![1], FitPolicy::by_width(800)), "filename"),
            (request("alice", "a.jpg", vec![], FitPolicy::by_width(800)), "file"),
            (request("alice", "a.jpg", vec![1], FitPolicy::by_width(0)), "target_width"),
            (request("alice", "a.jpg", vec![1], FitPolicy::by_size(0)), "target_size"),
        ];
        for (req, field) in cases {
            let err = uploader.upload(req, &CancelToken::new(), None).unwrap_err();
            assert!(
                matches!(err, UploadError::MissingField(f) if f == field),
                "expected MissingField({field}), got {err:?}"
            );
            assert_eq!(err.status_code(), 400);
        }
    }

    #[test]
    fn oversized_payload_is_413() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.limits.max_upload_bytes = 100;
        let uploader = Uploader::new(scripted(large_probe()), MemoryStore::new(), cfg).unwrap();
        let err = uploader
            .upload(
                request("alice", "a.jpg", vec![0; 101], FitPolicy::by_width(800)),
                &CancelToken::new(),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::PayloadTooLarge { size: 101, limit: 100 }
        ));
        assert_eq!(err.status_code(), 413);
    }

    #[test]
    fn undecodable_payload_is_400_and_never_connects() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let uploader = Uploader::new(RustCodec::new(), store.clone(), config(&tmp)).unwrap();
        let err = uploader
            .upload(
                request("alice", "a.jpg", b"definitely not an image".to_vec(), FitPolicy::by_width(800)),
                &CancelToken::new(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, UploadError::Decode(_)));
        assert_eq!(err.status_code(), 400);
        assert_eq!(store.connects(), 0);
    }

    #[test]
    fn dimension_width_is_capped() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.limits.max_target_width = 500;
        let uploader = Uploader::new(scripted(large_probe()), MemoryStore::new(), cfg).unwrap();
        let outcome = uploader
            .upload(
                request("alice", "a.jpg", vec![1; 2 * 1024 * 1024], FitPolicy::by_width(50_000)),
                &CancelToken::new(),
                None,
            )
            .unwrap();
        assert_eq!(uploader.codec.encode_calls()[0].width, 500);
        assert_eq!(outcome.thumbnail.width, 500);
    }

    // =========================================================================
    // Naming, cleanup, cancellation
    // =========================================================================

    #[test]
    fn unique_naming_never_collides() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let uploader = Uploader::new(RustCodec::new(), store.clone(), config(&tmp)).unwrap();
        let jpeg = gradient_jpeg(64, 48, 80);

        let mut names = Vec::new();
        for _ in 0..3 {
            let mut req = request("alice", "sunset.jpg", jpeg.clone(), FitPolicy::by_width(32));
            req.naming = NamingPolicy::Unique;
            names.push(uploader.upload(req, &CancelToken::new(), None).unwrap().stored_filename);
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("sunset-") && n.ends_with(".jpg")));
        assert_eq!(store.files().len(), 6);
    }

    #[test]
    fn replace_naming_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let uploader = Uploader::new(RustCodec::new(), store.clone(), config(&tmp)).unwrap();

        let first = gradient_jpeg(64, 48, 80);
        let second = gradient_jpeg(96, 48, 80);
        for bytes in [first, second.clone()] {
            uploader
                .upload(
                    request("alice", "dir/same.jpg", bytes, FitPolicy::by_width(32)),
                    &CancelToken::new(),
                    None,
                )
                .unwrap();
        }
        assert_eq!(store.files().len(), 2);
        assert_eq!(store.file("/alice/trip/same.jpg").unwrap(), second);
    }

    #[test]
    fn staging_cleanup_follows_config() {
        let tmp = TempDir::new().unwrap();
        let jpeg = gradient_jpeg(64, 48, 80);

        let uploader = Uploader::new(RustCodec::new(), MemoryStore::new(), config(&tmp)).unwrap();
        uploader
            .upload(
                request("alice", "a.jpg", jpeg.clone(), FitPolicy::by_width(32)),
                &CancelToken::new(),
                None,
            )
            .unwrap();
        assert!(files_under(tmp.path()).is_empty());

        let mut cfg = config(&tmp);
        cfg.staging.cleanup_on_success = false;
        let uploader = Uploader::new(RustCodec::new(), MemoryStore::new(), cfg).unwrap();
        uploader
            .upload(
                request("alice", "b.jpg", jpeg, FitPolicy::by_width(32)),
                &CancelToken::new(),
                None,
            )
            .unwrap();
        let staged = files_under(tmp.path());
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().any(|p| p.ends_with("b.jpg")));
        assert!(staged.iter().any(|p| p.ends_with("thumbnails/tn_b.jpg")));
    }

    #[test]
    fn cancelled_request_never_publishes() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let uploader = Uploader::new(scripted(large_probe()), store.clone(), config(&tmp)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = uploader
            .upload(
                request("alice", "a.jpg", vec![1; 10], FitPolicy::by_width(800)),
                &cancel,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(err.status_code(), 499);
        assert_eq!(store.connects(), 0);
    }

    #[test]
    fn publish_timeout_is_504() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.remote.transfer_timeout_secs = 1;
        let store = MemoryStore::new().with_put_delay(std::time::Duration::from_millis(1500));
        let uploader = Uploader::new(RustCodec::new(), store, cfg).unwrap();

        let err = uploader
            .upload(
                request("alice", "a.jpg", gradient_jpeg(64, 48, 80), FitPolicy::by_width(32)),
                &CancelToken::new(),
                None,
            )
            .unwrap_err();
        assert_eq!(err.status_code(), 504);
        assert_eq!(err.publish_stage(), Some(PublishStage::Original));
    }

    // =========================================================================
    // Events and batches
    // =========================================================================

    #[test]
    fn events_follow_state_machine() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(RustCodec::new(), MemoryStore::new(), config(&tmp)).unwrap();
        let (tx, rx) = mpsc::channel();

        uploader
            .upload(
                request("alice", "a.jpg", gradient_jpeg(64, 48, 80), FitPolicy::by_width(32)),
                &CancelToken::new(),
                Some(tx),
            )
            .unwrap();

        let kinds: Vec<String> = rx
            .iter()
            .map(|e| match e {
                UploadEvent::Stage { stage, .. } => stage.to_string(),
                UploadEvent::Optimized { .. } => "optimized".into(),
                UploadEvent::Completed { .. } => "completed".into(),
                UploadEvent::Failed { .. } => "failed".into(),
            })
            .collect();
        assert_eq!(
            kinds,
            ["validated", "probed", "optimized", "staged", "published", "completed"]
        );
    }

    #[test]
    fn failed_event_records_last_stage() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(
            RustCodec::new(),
            MemoryStore::new().unreachable(),
            config(&tmp),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel();

        let _ = uploader.upload(
            request("alice", "a.jpg", gradient_jpeg(64, 48, 80), FitPolicy::by_width(32)),
            &CancelToken::new(),
            Some(tx),
        );

        let last = rx.iter().last().unwrap();
        assert!(matches!(
            last,
            UploadEvent::Failed {
                after: Some(UploadStage::StagedLocally),
                status: 500,
                ..
            }
        ));
    }

    #[test]
    fn batch_uploads_into_one_folder() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new().non_atomic();
        let uploader = Uploader::new(RustCodec::new(), store.clone(), config(&tmp)).unwrap();
        let jpeg = gradient_jpeg(64, 48, 80);

        let requests = (0..5)
            .map(|i| request("alice", &format!("{i}.jpg"), jpeg.clone(), FitPolicy::by_width(32)))
            .chain(std::iter::once(request(
                "bad name!",
                "x.jpg",
                jpeg.clone(),
                FitPolicy::by_width(32),
            )))
            .collect();

        let results = uploader.upload_batch(requests, &CancelToken::new(), None);
        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(Result::is_ok));
        assert!(results[5].is_err());
        assert_eq!(store.files().len(), 10);
        assert_eq!(store.max_concurrent_mkdirs(), 1);
    }

    #[test]
    fn batch_caps_uploads_in_flight() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new().with_put_delay(Duration::from_millis(20));
        let mut cfg = config(&tmp);
        cfg.processing.max_uploads = Some(2);
        let uploader = Uploader::new(RustCodec::new(), store.clone(), cfg).unwrap();
        let jpeg = gradient_jpeg(64, 48, 80);

        let requests = (0..12)
            .map(|i| request("alice", &format!("{i}.jpg"), jpeg.clone(), FitPolicy::by_width(32)))
            .collect();
        let results = uploader.upload_batch(requests, &CancelToken::new(), None);

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(store.files().len(), 24);
        assert_eq!(store.connects(), 12);
        assert!(store.max_concurrent_puts() <= 2, "{}", store.max_concurrent_puts());
        assert!(store.max_open_sessions() <= 2, "{}", store.max_open_sessions());
    }

    #[test]
    fn upload_each_prepares_lazily_and_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.processing.max_uploads = Some(2);
        let uploader = Uploader::new(RustCodec::new(), MemoryStore::new(), cfg).unwrap();
        let jpeg = gradient_jpeg(64, 48, 80);
        let preparing = std::sync::atomic::AtomicUsize::new(0);

        let results = uploader.upload_each(
            vec!["0.jpg", "missing", "2.jpg", "3.jpg"],
            |name| {
                preparing.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if name == "missing" {
                    return Err(UploadError::MissingField("file"));
                }
                Ok(request("alice", name, jpeg.clone(), FitPolicy::by_width(32)))
            },
            &CancelToken::new(),
            None,
        );

        assert_eq!(preparing.into_inner(), 4);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().stored_filename, "0.jpg");
        assert!(matches!(results[1], Err(UploadError::MissingField("file"))));
        assert_eq!(results[3].as_ref().unwrap().stored_filename, "3.jpg");
    }

    #[test]
    fn empty_batch_is_empty() {
        let tmp = TempDir::new().unwrap();
        let uploader = Uploader::new(RustCodec::new(), MemoryStore::new(), config(&tmp)).unwrap();
        assert!(uploader.upload_batch(Vec::new(), &CancelToken::new(), None).is_empty());
    }
}
