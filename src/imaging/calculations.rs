//! Pure calculation functions for thumbnail dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate output dimensions for a width-driven resize.
///
/// The width is clamped to the source width (never upscale) and the height
/// follows the source aspect ratio, rounded to the nearest pixel. When
/// `max_height` is given and the derived height exceeds it, the height is
/// bounded instead and the width is re-derived from the aspect ratio.
///
/// # Examples
/// ```
/// # use thumbdrop::imaging::scaled_dimensions;
/// // 4000x3000 down to 1600 wide → 1600x1200
/// assert_eq!(scaled_dimensions((4000, 3000), 1600, None), (1600, 1200));
///
/// // Never upscales: 800x600 asked for 1600 → 800x600
/// assert_eq!(scaled_dimensions((800, 600), 1600, None), (800, 600));
/// ```
pub fn scaled_dimensions(source: (u32, u32), width: u32, max_height: Option<u32>) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return (src_w, src_h);
    }

    let w = width.clamp(1, src_w);
    let h = scale_edge(src_h, w, src_w);

    match max_height {
        Some(limit) if h > limit => {
            let h = limit.clamp(1, src_h);
            let w = scale_edge(src_w, h, src_h);
            (w, h)
        }
        _ => (w, h),
    }
}

/// Shrink a width by `ratio`, never going below `floor`.
///
/// If the width is already at or below the floor it is returned unchanged,
/// so a small source never grows.
pub fn shrink_width(width: u32, ratio: f64, floor: u32) -> u32 {
    if width <= floor {
        return width;
    }
    let shrunk = (width as f64 * ratio).round() as u32;
    shrunk.clamp(floor, width)
}

/// `edge * numerator / denominator`, rounded, at least 1.
fn scale_edge(edge: u32, numerator: u32, denominator: u32) -> u32 {
    ((edge as f64 * numerator as f64 / denominator as f64).round() as u32).max(1)
}
