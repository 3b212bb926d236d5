//! CLI output formatting.
//!
//! Every line leads with the client filename so interleaved output from a
//! parallel batch stays readable. Remote paths are secondary context on
//! indented lines.
//!
//! # Output Format
//!
//! ## Upload
//!
//! ```text
//! beach.jpg: validated
//! beach.jpg: probed
//! beach.jpg: thumbnail 1600x1200 q75, 1.0 MB, 4 attempts (converged)
//! beach.jpg: staged
//! beach.jpg: published
//! beach.jpg → /alice/trip/beach-1718031234567.jpg
//!     Thumbnail: /alice/trip/thumbnails/tn_beach-1718031234567.jpg
//! ```
//!
//! ## Plan
//!
//! ```text
//! Directories
//!     /alice
//!     /alice/trip
//!     /alice/trip/thumbnails
//! Original:  /alice/trip/beach.jpg
//! Thumbnail: /alice/trip/thumbnails/tn_beach.jpg
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and, where the CLI prints it directly, a `print_*` wrapper.
//! Format functions are pure: no I/O, no side effects.

use crate::imaging::{ImageProbe, SearchOutcome};
use crate::placement::ArtifactPlacementPlan;
use crate::upload::{ThumbnailSummary, UploadEvent};

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count, one decimal above a kilobyte.
fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

fn thumbnail_line(t: &ThumbnailSummary) -> String {
    match t.outcome {
        SearchOutcome::Passthrough => format!(
            "thumbnail {}x{}, reused original ({})",
            t.width,
            t.height,
            format_bytes(t.byte_size)
        ),
        outcome => {
            let quality = t.quality.map(|q| format!(" q{q}")).unwrap_or_default();
            let attempts = if t.attempts == 1 { "attempt" } else { "attempts" };
            let label = match outcome {
                SearchOutcome::Converged => " (converged)",
                SearchOutcome::Exhausted => " (best effort)",
                _ => "",
            };
            format!(
                "thumbnail {}x{}{quality}, {}, {} {attempts}{label}",
                t.width,
                t.height,
                format_bytes(t.byte_size),
                t.attempts
            )
        }
    }
}

/// Format one upload progress event.
pub fn format_upload_event(event: &UploadEvent) -> Vec<String> {
    match event {
        UploadEvent::Stage { filename, stage } => vec![format!("{filename}: {stage}")],
        UploadEvent::Optimized {
            filename,
            thumbnail,
        } => vec![format!("{filename}: {}", thumbnail_line(thumbnail))],
        UploadEvent::Completed { filename, outcome } => {
            let mut lines = vec![
                format!("{filename} \u{2192} {}", outcome.original_path),
                format!("{}Thumbnail: {}", indent(1), outcome.thumbnail_path),
            ];
            for dir in &outcome.dir_failures {
                lines.push(format!("{}Warning: could not ensure {dir}", indent(1)));
            }
            lines
        }
        UploadEvent::Failed {
            filename,
            after,
            error,
            status,
        } => {
            let after = after.map(|s| format!(" after {s}")).unwrap_or_default();
            vec![format!("{filename} \u{2717} [{status}]{after}: {error}")]
        }
    }
}

/// Format the end-of-batch tally.
pub fn format_batch_summary(succeeded: usize, failed: usize) -> String {
    let total = succeeded + failed;
    if failed == 0 {
        format!("Uploaded {total} file{}", if total == 1 { "" } else { "s" })
    } else {
        format!("Uploaded {succeeded} of {total} files, {failed} failed")
    }
}

/// Format a placement plan.
pub fn format_plan(plan: &ArtifactPlacementPlan) -> Vec<String> {
    let mut lines = vec!["Directories".to_string()];
    lines.extend(plan.remote_dirs.iter().map(|d| format!("{}{d}", indent(1))));
    lines.push(format!("Original:  {}", plan.original_remote_path));
    lines.push(format!("Thumbnail: {}", plan.thumbnail_remote_path));
    lines
}

pub fn print_plan(plan: &ArtifactPlacementPlan) {
    for line in format_plan(plan) {
        println!("{}", line);
    }
}

/// Format a probe result for `label` (usually the file path).
pub fn format_probe(label: &str, probe: &ImageProbe) -> Vec<String> {
    vec![
        label.to_string(),
        format!("{}Dimensions: {}x{}", indent(1), probe.width, probe.height),
        format!(
            "{}Size: {} ({} bytes)",
            indent(1),
            format_bytes(probe.encoded_byte_size),
            probe.encoded_byte_size
        ),
    ]
}

pub fn print_probe(label: &str, probe: &ImageProbe) {
    for line in format_probe(label, probe) {
        println!("{}", line);
    }
}
