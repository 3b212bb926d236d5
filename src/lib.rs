//! # Thumbdrop
//!
//! The upload pipeline behind a per-owner, per-folder photo gallery. Each
//! upload becomes two remote artifacts: the original, and a thumbnail that
//! meets a caller-chosen budget, either a pixel width or a byte size.
//!
//! # Architecture: One Request, Five Steps
//!
//! ```text
//! bytes ─► probe ─► fit thumbnail ─► stage locally ─► plan paths ─► publish
//!          (codec)   (optimizer)      (scratch dir)    (pure)        (remote)
//! ```
//!
//! Validation runs before any of it, so a bad owner or folder never creates
//! a directory anywhere. Publishing is ordered: directories parent first,
//! then the original, then the thumbnail. A thumbnail failure leaves the
//! original in place and is reported with its stage, so callers can tell
//! "nothing happened" from "original uploaded, thumbnail missing".
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`upload`] | Orchestrator: the per-request state machine, batches, progress events |
//! | [`imaging`] | Codec adapter (`image` crate) and the by-dimension / by-size thumbnail search |
//! | [`placement`] | Pure planner for remote paths and the directories they need |
//! | [`publish`] | Ordered, timeout-bounded transfer of both artifacts |
//! | [`remote`] | Remote store traits, the filesystem store, per-folder directory locks |
//! | [`staging`] | Local scratch writes and cleanup |
//! | [`naming`] | Owner/folder validation, filename sanitizing, collision stamps |
//! | [`response`] | Upload metadata decoding and JSON responses for the HTTP layer |
//! | [`config`] | `thumbdrop.toml` loading, merging, and validation |
//! | [`telemetry`] | `tracing` subscriber setup |
//! | [`types`] | Request types shared across modules (`UploadRequest`, `FitPolicy`) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Capped Search, Not Binary Search
//!
//! JPEG size is not monotonic in quality or width, so the by-size search is
//! a fixed walk (quality down, then width down, quality up when too small)
//! with a hard attempt cap. When the cap is hit the last buffer is returned:
//! a thumbnail a few percent over budget is acceptable, a failed upload is
//! not.
//!
//! ## Small Files Are Not Re-encoded
//!
//! Below the optimize floor (1 MiB by default) the original bytes are used as
//! the thumbnail verbatim. Re-encoding a small JPEG rarely makes it smaller.
//! The body is still fully decoded once, since a header probe alone would let
//! a truncated file through.
//!
//! ## No Remote Rollback
//!
//! Deleting the original after a failed thumbnail transfer is itself a
//! fallible remote operation. The failure is surfaced with its stage instead,
//! and staged files are kept for reconciliation.
//!
//! ## Synchronous, Thread-Based Concurrency
//!
//! Codec work runs on a rayon pool sized to the machine; each transfer runs on
//! a helper thread so it can be bounded by a timeout. Batches run on a fixed
//! number of upload workers, so payloads in memory and open remote sessions
//! stay bounded however many files are queued. There is no async
//! runtime: every suspension point is either CPU-bound or a blocking file
//! operation.

pub mod config;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod placement;
pub mod publish;
pub mod remote;
pub mod response;
pub mod staging;
pub mod telemetry;
pub mod types;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_helpers;
