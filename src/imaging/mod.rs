//! Image codec adapter and thumbnail optimizer.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Probe** | `ImageReader::into_dimensions` (header only) |
//! | **Decode** | `image` crate decoders |
//! | **Resize → JPEG** | Lanczos3 + `JpegEncoder` |
//! | **Fit search** | [`fit_thumbnail`] over any [`ImageCodec`] |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing one encode
//! - **Backend**: [`ImageCodec`] trait + [`RustCodec`]
//! - **Optimizer**: The by-dimension / by-size search

pub mod backend;
mod calculations;
pub mod optimizer;
mod params;
pub mod rust_backend;

pub use backend::{CodecError, ImageCodec, ImageProbe};
pub use calculations::{scaled_dimensions, shrink_width};
pub use optimizer::{
    OptimizeError, SearchOutcome, SearchSettings, ThumbnailResult, fit_thumbnail,
};
pub use params::{EncodeParams, Quality};
pub use rust_backend::RustCodec;
