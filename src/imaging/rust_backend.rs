//! Pure Rust codec backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Probe | `ImageReader::with_guessed_format` + `into_dimensions` (header only) |
//! | Decode (JPEG, PNG, TIFF, WebP, GIF) | `image` crate (pure Rust decoders) |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//!
//! The JPEG encoder writes no timestamps or other ambient data, so equal
//! inputs give byte-identical thumbnails.

use super::backend::{CodecError, ImageCodec, ImageProbe};
use super::calculations::scaled_dimensions;
use super::params::EncodeParams;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use std::borrow::Cow;
use std::io::Cursor;

/// Pure Rust codec using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, CodecError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::Decode(format!("failed to sniff format: {e}")))?;
    if reader.format().is_none() {
        return Err(CodecError::Decode("unrecognized image format".into()));
    }
    Ok(reader)
}

impl ImageCodec for RustCodec {
    type Decoded = DynamicImage;

    fn probe(&self, bytes: &[u8]) -> Result<ImageProbe, CodecError> {
        let (width, height) = reader(bytes)?
            .into_dimensions()
            .map_err(|e| CodecError::Decode(format!("failed to read dimensions: {e}")))?;
        Ok(ImageProbe {
            width,
            height,
            encoded_byte_size: bytes.len() as u64,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        reader(bytes)?
            .decode()
            .map_err(|e| CodecError::Decode(format!("failed to decode: {e}")))
    }

    fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CodecError> {
        let source = (image.width(), image.height());
        let (width, height) = scaled_dimensions(source, params.width, params.max_height);

        let resized = if (width, height) == source {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(image.resize_exact(width, height, FilterType::Lanczos3))
        };

        let rgb = resized.to_rgb8();
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, params.quality.value())
            .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| CodecError::Encode(format!("JPEG encode failed: {e}")))?;
        Ok(buf)
    }
}
