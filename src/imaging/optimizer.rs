//! Target-fit thumbnail search.
//!
//! Turns a [`FitPolicy`] and source bytes into a [`ThumbnailResult`]:
//!
//! - **By dimension**: one encode at the target width and the configured
//!   dimension quality.
//! - **By size**: a bounded walk over `(width, quality)`. Too big lowers the
//!   quality in steps down to the floor, then shrinks the width by a ratio down
//!   to the width floor. Too small raises the quality up to the ceiling. The
//!   walk stops inside `±tolerance` of the target or after `max_attempts`,
//!   whichever comes first; on exhaustion the last buffer is returned as is.
//!
//! Encoded size is not monotonic in quality or width, so this is a capped
//! heuristic rather than a binary search. Keep the cap.

use super::backend::{CodecError, ImageCodec, ImageProbe};
use super::calculations::{scaled_dimensions, shrink_width};
use super::params::{EncodeParams, Quality};
use crate::config::OptimizerConfig;
use crate::types::{CancelToken, FitPolicy};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("cancelled")]
    Cancelled,
}

/// How the thumbnail was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    /// Source bytes reused verbatim, no encode.
    Passthrough,
    /// Dimension mode: exactly one encode.
    Single,
    /// Size mode landed inside the tolerance band.
    Converged,
    /// Size mode hit the attempt cap; the last buffer was kept.
    Exhausted,
}

/// A finished thumbnail and how it was reached.
#[derive(Debug, Clone)]
pub struct ThumbnailResult {
    pub bytes: Vec<u8>,
    pub final_width: u32,
    pub final_height: u32,
    /// `None` for passthrough thumbnails, which were never re-encoded.
    pub final_quality: Option<Quality>,
    pub final_byte_size: u64,
    pub attempts_used: u32,
    pub outcome: SearchOutcome,
}

impl ThumbnailResult {
    /// Reuse the source bytes as the thumbnail.
    pub fn passthrough(bytes: Vec<u8>, probe: &ImageProbe) -> Self {
        Self {
            final_byte_size: bytes.len() as u64,
            bytes,
            final_width: probe.width,
            final_height: probe.height,
            final_quality: None,
            attempts_used: 0,
            outcome: SearchOutcome::Passthrough,
        }
    }
}

/// Typed view of [`OptimizerConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub dimension_quality: Quality,
    pub max_quality: Quality,
    pub min_quality: Quality,
    pub quality_step: u8,
    pub max_width: u32,
    pub min_width: u32,
    pub shrink_ratio: f64,
    pub tolerance: f64,
    pub max_attempts: u32,
}

impl SearchSettings {
    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self {
            dimension_quality: Quality::new(config.dimension_quality),
            max_quality: Quality::new(config.max_quality),
            min_quality: Quality::new(config.min_quality),
            quality_step: config.quality_step.clamp(1, 100) as u8,
            max_width: config.max_width.max(1),
            min_width: config.min_width.max(1),
            shrink_ratio: config.shrink_ratio,
            tolerance: config.tolerance,
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self::from_config(&OptimizerConfig::default())
    }
}

/// Produce a thumbnail for `policy`.
///
/// Decode errors propagate unchanged. Cancellation is checked before the
/// decode and before every attempt.
pub fn fit_thumbnail<C: ImageCodec>(
    codec: &C,
    bytes: &[u8],
    probe: &ImageProbe,
    policy: FitPolicy,
    settings: &SearchSettings,
    cancel: &CancelToken,
) -> Result<ThumbnailResult, OptimizeError> {
    check(cancel)?;
    let image = codec.decode(bytes)?;

    match policy {
        FitPolicy::ByDimension {
            target_width,
            target_height,
        } => {
            check(cancel)?;
            let params = EncodeParams::new(target_width, settings.dimension_quality)
                .with_max_height(target_height);
            let buf = codec.encode(&image, &params)?;
            Ok(finish(buf, probe, params, 1, SearchOutcome::Single))
        }
        FitPolicy::BySize { target_bytes } => {
            search_size(codec, &image, probe, target_bytes, settings, cancel)
        }
    }
}

fn search_size<C: ImageCodec>(
    codec: &C,
    image: &C::Decoded,
    probe: &ImageProbe,
    target_bytes: u64,
    settings: &SearchSettings,
    cancel: &CancelToken,
) -> Result<ThumbnailResult, OptimizeError> {
    let target = target_bytes as f64;
    let band = target * settings.tolerance;

    let mut width = probe.width.min(settings.max_width);
    let mut quality = settings.max_quality;
    let mut attempts = 0;
    let mut last: Option<(EncodeParams, Vec<u8>)> = None;

    while attempts < settings.max_attempts {
        check(cancel)?;
        let params = EncodeParams::new(width, quality);
        // Same knobs as last time: the encoder is deterministic, reuse the buffer.
        let buf = match last.take() {
            Some((prev, buf)) if prev == params => buf,
            _ => codec.encode(image, &params)?,
        };
        attempts += 1;

        let size = buf.len() as f64;
        debug!(
            attempt = attempts,
            width,
            quality = quality.value(),
            size = buf.len(),
            target = target_bytes,
            "thumbnail attempt"
        );

        if (size - target).abs() <= band {
            return Ok(finish(buf, probe, params, attempts, SearchOutcome::Converged));
        }

        if size > target {
            if quality > settings.min_quality {
                quality = quality.lowered(settings.quality_step, settings.min_quality);
            } else {
                width = shrink_width(width, settings.shrink_ratio, settings.min_width);
            }
        } else {
            quality = quality.raised(settings.quality_step, settings.max_quality);
        }

        last = Some((params, buf));
    }

    match last {
        Some((params, buf)) => Ok(finish(buf, probe, params, attempts, SearchOutcome::Exhausted)),
        // max_attempts is at least 1, so the loop ran.
        None => Err(OptimizeError::Codec(CodecError::Encode(
            "no encode attempts were made".into(),
        ))),
    }
}

fn finish(
    bytes: Vec<u8>,
    probe: &ImageProbe,
    params: EncodeParams,
    attempts: u32,
    outcome: SearchOutcome,
) -> ThumbnailResult {
    let (final_width, final_height) =
        scaled_dimensions(probe.dimensions(), params.width, params.max_height);
    ThumbnailResult {
        final_byte_size: bytes.len() as u64,
        bytes,
        final_width,
        final_height,
        final_quality: Some(params.quality),
        attempts_used: attempts,
        outcome,
    }
}

fn check(cancel: &CancelToken) -> Result<(), OptimizeError> {
    if cancel.is_cancelled() {
        Err(OptimizeError::Cancelled)
    } else {
        Ok(())
    }
}
