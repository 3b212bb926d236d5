//! Identifier validation and the stored-filename convention.
//!
//! Owners and folders become remote directory names, so they are restricted
//! to `[A-Za-z0-9_]` and checked before anything touches a disk or a network.
//! Client filenames are reduced to their last path component; with the
//! unique policy a stamp is appended to the base name:
//!
//! - `sunset.jpg` → `sunset-1718031234567.jpg`
//! - `archive.tar.gz` → `archive.tar-1718031234567.gz`
//! - `README` → `README-1718031234567`
//!
//! Stamps are milliseconds since the Unix epoch, made strictly increasing
//! across the process so two uploads in the same millisecond still differ.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("{field} must match ^[A-Za-z0-9_]+$ (got {value:?})")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("invalid filename {0:?}")]
    InvalidFilename(String),
    #[error("missing required field: {0}")]
    Missing(&'static str),
}

/// Check an owner or folder name against `^[A-Za-z0-9_]+$`.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::Missing(field));
    }
    if value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(NameError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })
    }
}

/// Reduce a client filename to a safe single path component.
///
/// Directory parts (either separator) are dropped. Empty names are a missing
/// field; `.`, `..` and names with control characters are rejected.
pub fn sanitize_filename(raw: &str) -> Result<String, NameError> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() {
        return Err(NameError::Missing("filename"));
    }
    if name == "." || name == ".." || name.chars().any(char::is_control) {
        return Err(NameError::InvalidFilename(raw.to_string()));
    }
    Ok(name.to_string())
}

/// Split `name` into base and extension (with its dot).
///
/// A leading dot does not start an extension: `.hidden` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Append `stamp` to the base name, keeping the extension.
pub fn unique_filename(name: &str, stamp: u64) -> String {
    let (base, ext) = split_extension(name);
    format!("{base}-{stamp}{ext}")
}

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Next process-wide filename stamp: wall-clock milliseconds, bumped past the
/// previous stamp when the clock has not advanced (or went backwards).
pub fn next_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let prev = LAST_STAMP
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    now.max(prev + 1)
}
