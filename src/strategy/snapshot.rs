//! Snapshot strategy: one-shot capture of the live preview.
//!
//! The embedding editor owns a styled visual tree the user is looking at;
//! this backend asks it to serialize that tree into pixels in a single
//! operation. It is faithful to the real styling but opaque: a capture
//! either succeeds or fails wholesale (e.g. a cross-origin resource
//! taints the surface), there is no partial degradation here.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::debug;

use super::{PixelBuffer, RenderStrategy, Scene, StrategyKind, scaled_dims};
use crate::error::{Error, Result};
use crate::layout::CANVAS_ASPECT;

/// Maximum relative aspect drift a capture may have before it is treated
/// as a wrong-crop failure instead of rounding noise.
const CAPTURE_ASPECT_TOLERANCE: f32 = 0.01;

// ============================================================================
// PreviewSource
// ============================================================================

/// Access to the live, currently-styled visual tree.
///
/// Implemented by the embedding editor. `capture` must return the whole
/// card at `scale`, or an error when the surface cannot be read back
/// (which the coordinator translates into a fallback to the next
/// strategy).
pub trait PreviewSource {
    fn capture(&self, scale: f32) -> Result<RgbaImage>;
}

// ============================================================================
// SnapshotStrategy
// ============================================================================

/// Last-priority backend: delegate to the live preview.
pub struct SnapshotStrategy {
    source: Box<dyn PreviewSource>,
}

impl SnapshotStrategy {
    pub fn new(source: Box<dyn PreviewSource>) -> Self {
        Self { source }
    }
}

impl RenderStrategy for SnapshotStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Snapshot
    }

    fn render(&self, _scene: &Scene, scale: f32) -> Result<PixelBuffer> {
        let captured = self.source.capture(scale)?;
        let (width, height) = scaled_dims(scale);

        if captured.dimensions() == (width, height) {
            return Ok(PixelBuffer::new(captured));
        }

        // A capture that merely rounded differently is normalized to the
        // exact postcondition size; one with the wrong shape is a failure.
        let (cw, ch) = captured.dimensions();
        if cw == 0 || ch == 0 {
            return Err(Error::Render("preview capture was empty".to_string()));
        }
        let aspect = cw as f32 / ch as f32;
        if (aspect - CANVAS_ASPECT).abs() / CANVAS_ASPECT > CAPTURE_ASPECT_TOLERANCE {
            return Err(Error::Render(format!(
                "preview capture has wrong shape: {cw}x{ch}"
            )));
        }

        debug!("normalizing preview capture from {cw}x{ch} to {width}x{height}");
        let normalized = imageops::resize(&captured, width, height, FilterType::CatmullRom);
        Ok(PixelBuffer::new(normalized))
    }
}

// ============================================================================
// Tests
// ============================================================================
