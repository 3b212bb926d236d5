//! Image codec trait and shared types.
//!
//! The [`ImageCodec`] trait defines the operations the upload pipeline needs
//! from an image library: probe, decode, and encode at a width and quality.
//! [`reencode`](ImageCodec::reencode) composes the last two for one-shot use;
//! the optimizer decodes once and encodes per attempt.
//!
//! The production implementation is
//! [`RustCodec`](super::rust_backend::RustCodec), built on the `image` crate.

use super::params::EncodeParams;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unsupported or corrupt image: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Intrinsic facts about an uploaded image, computed once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageProbe {
    pub width: u32,
    pub height: u32,
    /// Size of the encoded input as received, in bytes.
    pub encoded_byte_size: u64,
}

impl ImageProbe {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Trait for image codec backends.
///
/// Implementations must be deterministic: the same decoded image and the same
/// [`EncodeParams`] always produce byte-identical output.
pub trait ImageCodec: Sync {
    /// Decoded pixel data, reused across encode attempts.
    type Decoded: Send + Sync;

    /// Read dimensions and size without a full decode where possible.
    fn probe(&self, bytes: &[u8]) -> Result<ImageProbe, CodecError>;

    /// Fully decode the input.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Decoded, CodecError>;

    /// Resize (never upscaling) and encode as a lossy format.
    fn encode(&self, image: &Self::Decoded, params: &EncodeParams) -> Result<Vec<u8>, CodecError>;

    /// Decode then encode in one step.
    fn reencode(&self, bytes: &[u8], params: &EncodeParams) -> Result<Vec<u8>, CodecError> {
        let image = self.decode(bytes)?;
        self.encode(&image, params)
    }
}
