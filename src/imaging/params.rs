//! Parameter types for codec operations.
//!
//! These structs describe *what* to encode, not *how*. They are the interface
//! between the [`optimizer`](super::optimizer) (which decides the next search
//! point) and the [`backend`](super::backend) (which does the pixel work), so a
//! scripted codec can stand in for the real one in tests.
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 80). Clamped on construction.
//! - [`EncodeParams`]: target width, optional height bound, and quality for one attempt.

use serde::{Deserialize, Serialize};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Step down by `step`, never below `floor`.
    pub fn lowered(self, step: u8, floor: Quality) -> Self {
        Self(self.0.saturating_sub(step).max(floor.0).max(1))
    }

    /// Step up by `step`, never above `ceiling`.
    pub fn raised(self, step: u8, ceiling: Quality) -> Self {
        Self(self.0.saturating_add(step).min(ceiling.0).min(100))
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// One re-encode request.
///
/// `width` is the requested primary dimension; the backend clamps it to the
/// source width and derives the height from the source aspect ratio.
/// `max_height`, when set, additionally bounds the output height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub width: u32,
    pub max_height: Option<u32>,
    pub quality: Quality,
}

impl EncodeParams {
    pub fn new(width: u32, quality: Quality) -> Self {
        Self {
            width,
            max_height: None,
            quality,
        }
    }

    pub fn with_max_height(mut self, max_height: Option<u32>) -> Self {
        self.max_height = max_height;
        self
    }
}
