//! Output verifier: cheap statistical checks on rendered buffers.
//!
//! The verifier exists to catch whole-class rendering failures — blank
//! canvas, wrong crop, silently distorted output — before bytes leave the
//! engine. It is deliberately not a pixel-perfect comparison: it checks
//! the aspect ratio against the canonical canvas ratio, then estimates
//! how much of the buffer differs from its border-dominant background.
//! Either rejection uniformly sends the coordinator to the next strategy.

use crate::error::Error;
use crate::layout::CANVAS_ASPECT;
use crate::strategy::PixelBuffer;

// ============================================================================
// Configuration
// ============================================================================

/// Thresholds for the verifier checks.
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// Allowed relative deviation from the canonical 0.7 ratio.
    pub aspect_tolerance: f32,

    /// Minimum fraction of pixels that must differ from the background.
    /// The default is permissive: a card whose only content is one short
    /// text line must still pass.
    pub min_content_fraction: f32,

    /// Per-channel distance beyond which a pixel counts as content.
    pub channel_tolerance: u8,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            aspect_tolerance: 0.01,
            min_content_fraction: 0.0005,
            channel_tolerance: 12,
        }
    }
}

// ============================================================================
// Rejection
// ============================================================================

/// Why a buffer was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    AspectMismatch { width: u32, height: u32 },
    EmptyContent { fraction: f32 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AspectMismatch { width, height } => {
                write!(f, "aspect-ratio-mismatch ({width}x{height})")
            }
            Self::EmptyContent { fraction } => {
                write!(f, "empty-content (fraction {fraction:.5})")
            }
        }
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::AspectMismatch { width, height } => Error::AspectMismatch { width, height },
            Rejection::EmptyContent { fraction } => Error::EmptyContent { fraction },
        }
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Statistical acceptance check for rendered buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Accepts or rejects a buffer. Checks run in order: aspect ratio
    /// first, then content fraction.
    pub fn verify(&self, buffer: &PixelBuffer) -> Result<(), Rejection> {
        if !self.aspect_ok(buffer) {
            return Err(Rejection::AspectMismatch {
                width: buffer.width(),
                height: buffer.height(),
            });
        }

        let fraction = self.content_fraction(buffer);
        if fraction < self.config.min_content_fraction {
            return Err(Rejection::EmptyContent { fraction });
        }
        Ok(())
    }

    fn aspect_ok(&self, buffer: &PixelBuffer) -> bool {
        if buffer.height() == 0 {
            return false;
        }
        let deviation = (buffer.aspect() - CANVAS_ASPECT).abs() / CANVAS_ASPECT;
        deviation <= self.config.aspect_tolerance
    }

    /// Fraction of pixels that are neither transparent nor close to the
    /// border-dominant color.
    fn content_fraction(&self, buffer: &PixelBuffer) -> f32 {
        let img = &buffer.data;
        let total = (img.width() as u64) * (img.height() as u64);
        if total == 0 {
            return 0.0;
        }

        let background = border_dominant_color(img);
        let tolerance = self.config.channel_tolerance;

        let mut content: u64 = 0;
        for pixel in img.pixels() {
            if pixel[3] <= 8 {
                continue;
            }
            match background {
                // Transparent border: any visible pixel is content.
                None => content += 1,
                Some(bg) => {
                    let distance = pixel[0].abs_diff(bg[0])
                        .max(pixel[1].abs_diff(bg[1]))
                        .max(pixel[2].abs_diff(bg[2]));
                    if distance > tolerance {
                        content += 1;
                    }
                }
            }
        }
        content as f32 / total as f32
    }
}

/// Alpha-weighted average color of the one-pixel border ring, or `None`
/// when the border is fully transparent.
fn border_dominant_color(img: &image::RgbaImage) -> Option<[u8; 3]> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let mut sums = [0u64; 3];
    let mut alpha_total: u64 = 0;

    let mut sample = |x: u32, y: u32| {
        let pixel = img.get_pixel(x, y);
        let a = pixel[3] as u64;
        for (sum, channel) in sums.iter_mut().zip(pixel.0.iter()) {
            *sum += *channel as u64 * a;
        }
        alpha_total += a;
    };

    for x in 0..width {
        sample(x, 0);
        if height > 1 {
            sample(x, height - 1);
        }
    }
    for y in 1..height.saturating_sub(1) {
        sample(0, y);
        if width > 1 {
            sample(width - 1, y);
        }
    }

    if alpha_total == 0 {
        return None;
    }
    Some([
        (sums[0] / alpha_total) as u8,
        (sums[1] / alpha_total) as u8,
        (sums[2] / alpha_total) as u8,
    ])
}

// ============================================================================
// Tests
// ============================================================================
