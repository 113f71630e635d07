//! Rasterization strategies: interchangeable backends over one contract.
//!
//! Every backend turns a [`Scene`] (frozen snapshot + resolved resources)
//! into a [`PixelBuffer`] whose dimensions are exactly the canvas size
//! multiplied by the export scale. The three implementations are
//! deliberately independent — they share this contract and a few pixel
//! helpers, not their rendering paths — so the coordinator's fallback
//! chain actually changes failure modes when it advances:
//!
//! 1. [`DirectDrawStrategy`](direct::DirectDrawStrategy) — manual
//!    compositing with full positional control.
//! 2. [`VectorStrategy`](vector::VectorStrategy) — SVG markup, then
//!    rasterized; can also be returned un-rasterized.
//! 3. [`SnapshotStrategy`](snapshot::SnapshotStrategy) — opaque capture of
//!    the live preview.

pub mod direct;
pub mod snapshot;
pub mod vector;

use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use palette::{Hsl, IntoColor, Srgb};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layout::{CANVAS_HEIGHT, CANVAS_WIDTH, LayoutSnapshot};
use crate::resource::ResolvedResources;

pub use direct::DirectDrawStrategy;
pub use snapshot::{PreviewSource, SnapshotStrategy};
pub use vector::VectorStrategy;

// ============================================================================
// Contract types
// ============================================================================

/// Identifies a rasterization backend, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    DirectDraw,
    Vector,
    Snapshot,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectDraw => write!(f, "direct-draw"),
            Self::Vector => write!(f, "vector"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// An RGBA pixel surface produced by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub data: RgbaImage,
}

impl PixelBuffer {
    pub fn new(data: RgbaImage) -> Self {
        Self { data }
    }

    pub fn width(&self) -> u32 {
        self.data.width()
    }

    pub fn height(&self) -> u32 {
        self.data.height()
    }

    /// Width/height ratio; zero-height buffers report 0.
    pub fn aspect(&self) -> f32 {
        if self.height() == 0 {
            0.0
        } else {
            self.width() as f32 / self.height() as f32
        }
    }
}

/// The input every strategy renders from: a frozen snapshot paired with
/// its gate-resolved resources.
pub struct Scene {
    pub snapshot: LayoutSnapshot,
    pub resources: ResolvedResources,
}

impl Scene {
    pub fn new(snapshot: LayoutSnapshot, resources: ResolvedResources) -> Self {
        Self { snapshot, resources }
    }
}

/// One rasterization backend.
pub trait RenderStrategy {
    fn kind(&self) -> StrategyKind;

    /// Renders the scene at the given scale.
    ///
    /// Hard postcondition: the buffer's dimensions equal
    /// `canvas_width * scale` x `canvas_height * scale` exactly. A
    /// violation is a strategy bug, not a caller error — the verifier
    /// treats it as such.
    fn render(&self, scene: &Scene, scale: f32) -> Result<PixelBuffer>;
}

// ============================================================================
// Shared pixel helpers
// ============================================================================

/// Output dimensions for a scale factor: canvas size times scale, rounded
/// once. Every strategy sizes its surface through this so the
/// postcondition cannot drift between backends.
pub fn scaled_dims(scale: f32) -> (u32, u32) {
    (
        (CANVAS_WIDTH * scale).round() as u32,
        (CANVAS_HEIGHT * scale).round() as u32,
    )
}

/// Source-over blends `src` into `dst` using integer arithmetic.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = src[3] as u32;
    if sa == 0 {
        return;
    }
    if sa == 255 {
        *dst = src;
        return;
    }

    let da = dst[3] as u32;
    let residual = da * (255 - sa) / 255;
    let out_a = sa + residual;
    if out_a == 0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }

    for channel in 0..3 {
        let s = src[channel] as u32;
        let d = dst[channel] as u32;
        dst[channel] = ((s * sa + d * residual) / out_a) as u8;
    }
    dst[3] = out_a as u8;
}

/// Composites `src` over `dest` with its top-left corner at `(x, y)`.
/// Regions outside the destination are clipped.
pub fn composite_over(dest: &mut RgbaImage, src: &RgbaImage, x: i32, y: i32) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + src.width() as i32).min(dest.width() as i32);
    let y1 = (y + src.height() as i32).min(dest.height() as i32);

    for dy in y0..y1 {
        for dx in x0..x1 {
            let sp = *src.get_pixel((dx - x) as u32, (dy - y) as u32);
            blend_pixel(dest.get_pixel_mut(dx as u32, dy as u32), sp);
        }
    }
}

/// Fits `src` into `target_w x target_h` with cover semantics: scale to
/// fill, crop overflow centered, preserve the source aspect ratio — never
/// stretch.
pub fn cover_fit(src: &RgbaImage, target_w: u32, target_h: u32) -> RgbaImage {
    let (sw, sh) = src.dimensions();
    if sw == 0 || sh == 0 || target_w == 0 || target_h == 0 {
        return RgbaImage::new(target_w, target_h);
    }

    let factor = (target_w as f32 / sw as f32).max(target_h as f32 / sh as f32);
    let rw = ((sw as f32 * factor).ceil() as u32).max(target_w);
    let rh = ((sh as f32 * factor).ceil() as u32).max(target_h);

    let resized = imageops::resize(src, rw, rh, FilterType::CatmullRom);
    let crop_x = (rw - target_w) / 2;
    let crop_y = (rh - target_h) / 2;
    imageops::crop_imm(&resized, crop_x, crop_y, target_w, target_h).to_image()
}

/// Neutral placeholder tone used where an image went missing: white with
/// its lightness pulled down by `depth`.
pub fn placeholder_tone(depth: f32) -> Rgba<u8> {
    let mut hsl: Hsl = Srgb::new(1.0f32, 1.0, 1.0).into_color();
    hsl.lightness = (hsl.lightness - depth).clamp(0.0, 1.0);
    let tone: Srgb = hsl.into_color();
    Rgba([
        (tone.red * 255.0).round() as u8,
        (tone.green * 255.0).round() as u8,
        (tone.blue * 255.0).round() as u8,
        255,
    ])
}

/// Encodes an RGBA surface as PNG bytes.
pub fn png_bytes(image: &RgbaImage) -> std::result::Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dims_are_exact_for_integer_scales() {
        for scale in [1.0f32, 2.0, 3.0, 4.0] {
            let (w, h) = scaled_dims(scale);
            assert_eq!(w, (350.0 * scale) as u32);
            assert_eq!(h, (500.0 * scale) as u32);
        }
    }

    #[test]
    fn opaque_source_replaces_destination() {
        let mut dest = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let src = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]));

        composite_over(&mut dest, &src, 1, 1);

        assert_eq!(dest.get_pixel(1, 1).0, [0, 0, 255, 255]);
        assert_eq!(dest.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn semi_transparent_source_blends() {
        let mut dst = Rgba([255, 0, 0, 255]);
        blend_pixel(&mut dst, Rgba([0, 0, 255, 128]));

        assert!(dst[0] > 0, "red should survive the blend");
        assert!(dst[2] > 0, "blue should contribute");
        assert_eq!(dst[3], 255);
    }

    #[test]
    fn composite_clips_out_of_bounds_placement() {
        let mut dest = RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 255]));
        let src = RgbaImage::from_pixel(8, 8, Rgba([200, 200, 200, 255]));

        // Mostly hangs off the top-left; must not panic and must paint the overlap.
        composite_over(&mut dest, &src, -6, -6);
        assert_eq!(dest.get_pixel(0, 0).0, [200, 200, 200, 255]);
        assert_eq!(dest.get_pixel(3, 3).0, [10, 10, 10, 255]);
    }

    #[test]
    fn cover_fit_fills_target_without_stretching() {
        // Wide source into a portrait target: width must be cropped.
        let src = RgbaImage::from_pixel(100, 20, Rgba([1, 2, 3, 255]));
        let fitted = cover_fit(&src, 35, 50);
        assert_eq!(fitted.dimensions(), (35, 50));

        // Degenerate source still yields a full-size (transparent) target.
        let empty = RgbaImage::new(0, 0);
        assert_eq!(cover_fit(&empty, 10, 10).dimensions(), (10, 10));
    }

    #[test]
    fn placeholder_tone_is_light_and_opaque() {
        let tone = placeholder_tone(0.06);
        assert_eq!(tone[3], 255);
        assert!(tone[0] > 200 && tone[0] < 255);
        assert_eq!(tone[0], tone[1]);
        assert_eq!(tone[1], tone[2]);
    }

    #[test]
    fn png_bytes_roundtrip_decodes() {
        let img = RgbaImage::from_pixel(6, 3, Rgba([9, 8, 7, 255]));
        let bytes = png_bytes(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (6, 3));
        assert_eq!(decoded.get_pixel(2, 1).0, [9, 8, 7, 255]);
    }
}
