//! Direct-Draw strategy: manual pixel-level compositing.
//!
//! Walks the scene in the fixed z-order (background → avatar → image
//! modules → text → enabled ability labels → phone) and paints each
//! element onto an offscreen RGBA surface with explicit coordinate math.
//! Images are fitted with cover semantics; the avatar is masked to an
//! anti-aliased circle. Text metrics and line wrapping are implemented
//! here from `fontdue` glyph data — this backend owes its positional
//! precision to doing that work itself.
//!
//! Missing resources never fail the render: the affected area is painted
//! with a neutral placeholder (or skipped, for text without a usable
//! font) and the verifier decides whether the degraded buffer is
//! acceptable.

use image::{Rgba, RgbaImage};
use log::warn;

use super::{
    PixelBuffer, RenderStrategy, Scene, StrategyKind, composite_over, cover_fit, placeholder_tone,
    scaled_dims,
};
use crate::error::Result;
use crate::layout::{Module, ModuleContent, TextStyle};

/// Display box for an image module that neither declares a size nor has a
/// decodable source, in canvas units.
const FALLBACK_IMAGE_BOX: f32 = 48.0;

/// Lightness drop of the placeholder tones, from subtle (background) to
/// pronounced (avatar disc).
const BACKGROUND_PLACEHOLDER_DEPTH: f32 = 0.04;
const IMAGE_PLACEHOLDER_DEPTH: f32 = 0.08;
const AVATAR_PLACEHOLDER_DEPTH: f32 = 0.12;

// ============================================================================
// DirectDrawStrategy
// ============================================================================

/// The first-priority backend: full positional control, no dependency on
/// a live preview or a markup engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDrawStrategy;

impl DirectDrawStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl RenderStrategy for DirectDrawStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectDraw
    }

    fn render(&self, scene: &Scene, scale: f32) -> Result<PixelBuffer> {
        let (width, height) = scaled_dims(scale);
        let mut surface = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        paint_background(&mut surface, scene, width, height);
        paint_avatar(&mut surface, scene, scale);
        for module in scene.snapshot.visible_modules() {
            paint_module(&mut surface, scene, module, (0.0, 0.0), scale);
        }

        Ok(PixelBuffer::new(surface))
    }
}

// ============================================================================
// Painting passes
// ============================================================================

fn paint_background(surface: &mut RgbaImage, scene: &Scene, width: u32, height: u32) {
    let Some(reference) = &scene.snapshot.background_image_ref else {
        return;
    };

    match scene.resources.image(reference) {
        Some(src) => {
            let fitted = cover_fit(src, width, height);
            composite_over(surface, &fitted, 0, 0);
        }
        None => {
            fill_rect(
                surface,
                0,
                0,
                width,
                height,
                placeholder_tone(BACKGROUND_PLACEHOLDER_DEPTH),
            );
        }
    }
}

fn paint_avatar(surface: &mut RgbaImage, scene: &Scene, scale: f32) {
    let Some(avatar) = &scene.snapshot.avatar else {
        return;
    };

    let diameter = (avatar.size_px * scale).round().max(1.0) as u32;
    let mut disc = match avatar.image_ref.as_ref().and_then(|r| scene.resources.image(r)) {
        Some(src) => cover_fit(src, diameter, diameter),
        None => RgbaImage::from_pixel(
            diameter,
            diameter,
            placeholder_tone(AVATAR_PLACEHOLDER_DEPTH),
        ),
    };
    mask_circle(&mut disc);

    let x = (avatar.position.x * scale).round() as i32;
    let y = (avatar.position.y * scale).round() as i32;
    composite_over(surface, &disc, x, y);
}

fn paint_module(surface: &mut RgbaImage, scene: &Scene, module: &Module, origin: (f32, f32), scale: f32) {
    let x = origin.0 + module.position.x;
    let y = origin.1 + module.position.y;

    match &module.content {
        ModuleContent::Text(text) => {
            paint_text(surface, scene, text, &module.style, x, y, scale);
        }
        ModuleContent::Image {
            resource,
            width,
            height,
        } => {
            paint_image(surface, scene, resource, *width, *height, x, y, scale);
        }
        ModuleContent::Group(children) => {
            for child in children {
                paint_module(surface, scene, child, (x, y), scale);
            }
        }
    }
}

fn paint_image(
    surface: &mut RgbaImage,
    scene: &Scene,
    resource: &str,
    box_w: Option<f32>,
    box_h: Option<f32>,
    x: f32,
    y: f32,
    scale: f32,
) {
    let px = (x * scale).round() as i32;
    let py = (y * scale).round() as i32;

    match scene.resources.image(resource) {
        Some(src) => {
            // Declared box in canvas units, or the image's natural size.
            let (bw, bh) = match (box_w, box_h) {
                (Some(w), Some(h)) => (w, h),
                _ => (src.width() as f32, src.height() as f32),
            };
            let tw = (bw * scale).round().max(1.0) as u32;
            let th = (bh * scale).round().max(1.0) as u32;
            let fitted = cover_fit(src, tw, th);
            composite_over(surface, &fitted, px, py);
        }
        None => {
            let bw = box_w.unwrap_or(FALLBACK_IMAGE_BOX);
            let bh = box_h.unwrap_or(FALLBACK_IMAGE_BOX);
            fill_rect(
                surface,
                px,
                py,
                (bw * scale).round() as u32,
                (bh * scale).round() as u32,
                placeholder_tone(IMAGE_PLACEHOLDER_DEPTH),
            );
        }
    }
}

// ============================================================================
// Text: metrics, wrapping and glyph compositing
// ============================================================================

fn paint_text(
    surface: &mut RgbaImage,
    scene: &Scene,
    text: &str,
    style: &TextStyle,
    x: f32,
    y: f32,
    scale: f32,
) {
    let Some(loaded) = scene.resources.font() else {
        warn!("skipping text render: no usable font in scene");
        return;
    };
    let font = &loaded.font;

    let px = style.font_size_px * scale;
    let color = style.rgba();

    // Wrap at the right canvas edge relative to the module's position.
    let max_width = ((scene.snapshot.canvas_width - x) * scale).max(px);
    let lines = wrap_text(font, text, px, max_width);

    let (ascent, line_advance) = match font.horizontal_line_metrics(px) {
        Some(m) => (m.ascent, m.new_line_size),
        None => (px * 0.8, px * 1.2),
    };

    let mut baseline = y * scale + ascent;
    for line in &lines {
        draw_line(surface, font, line, x * scale, baseline, px, color);
        if style.is_bold() {
            // Faux bold: second pass shifted by a fraction of the size.
            let shift = (px / 24.0).max(1.0);
            draw_line(surface, font, line, x * scale + shift, baseline, px, color);
        }
        baseline += line_advance;
    }
}

fn draw_line(
    surface: &mut RgbaImage,
    font: &fontdue::Font,
    line: &str,
    origin_x: f32,
    baseline: f32,
    px: f32,
    color: [u8; 4],
) {
    let mut pen = origin_x;
    for ch in line.chars() {
        let (metrics, coverage) = font.rasterize(ch, px);
        if metrics.width > 0 && metrics.height > 0 {
            let glyph = tint_coverage(&coverage, metrics.width, metrics.height, color);
            let gx = (pen + metrics.xmin as f32).round() as i32;
            let gy = (baseline - metrics.height as f32 - metrics.ymin as f32).round() as i32;
            composite_over(surface, &glyph, gx, gy);
        }
        pen += metrics.advance_width;
    }
}

/// Converts a fontdue coverage bitmap into a tinted RGBA glyph image.
fn tint_coverage(coverage: &[u8], width: usize, height: usize, color: [u8; 4]) -> RgbaImage {
    let mut glyph = RgbaImage::new(width as u32, height as u32);
    for (i, pixel) in glyph.pixels_mut().enumerate() {
        let alpha = (coverage[i] as u16 * color[3] as u16 / 255) as u8;
        *pixel = Rgba([color[0], color[1], color[2], alpha]);
    }
    glyph
}

/// Greedy word wrap over fontdue advance widths. Explicit newlines are
/// preserved; a single word wider than the limit is placed on its own
/// line rather than split.
fn wrap_text(font: &fontdue::Font, text: &str, px: f32, max_width: f32) -> Vec<String> {
    let space_width = font.metrics(' ', px).advance_width;
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_width = 0.0f32;

        for word in paragraph.split_whitespace() {
            let word_width = measure(font, word, px);
            let lead = if current.is_empty() { 0.0 } else { space_width };

            if !current.is_empty() && current_width + lead + word_width > max_width {
                lines.push(std::mem::take(&mut current));
                current_width = 0.0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_width += space_width;
            }
            current.push_str(word);
            current_width += word_width;
        }
        lines.push(current);
    }
    lines
}

fn measure(font: &fontdue::Font, text: &str, px: f32) -> f32 {
    text.chars().map(|c| font.metrics(c, px).advance_width).sum()
}

// ============================================================================
// Surface helpers
// ============================================================================

fn fill_rect(surface: &mut RgbaImage, x: i32, y: i32, width: u32, height: u32, color: Rgba<u8>) {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = ((x + width as i32).max(0) as u32).min(surface.width());
    let y1 = ((y + height as i32).max(0) as u32).min(surface.height());

    for yy in y0..y1 {
        for xx in x0..x1 {
            surface.put_pixel(xx, yy, color);
        }
    }
}

/// Multiplies the image's alpha by an anti-aliased circular mask
/// inscribed in its bounds.
fn mask_circle(disc: &mut RgbaImage) {
    let size = disc.width().min(disc.height()) as f32;
    let radius = size / 2.0;
    let cx = disc.width() as f32 / 2.0;
    let cy = disc.height() as f32 / 2.0;

    for (x, y, pixel) in disc.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let distance = (dx * dx + dy * dy).sqrt();
        let coverage = (radius - distance + 0.5).clamp(0.0, 1.0);
        pixel[3] = (pixel[3] as f32 * coverage).round() as u8;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{AvatarConfig, LayoutModel, Module, Position};
    use crate::resource::ResolvedResources;

    fn scene_with(model: &LayoutModel, resources: ResolvedResources) -> Scene {
        Scene::new(model.freeze(), resources)
    }

    #[test]
    fn output_dimensions_track_scale_exactly() {
        let model = LayoutModel::new();
        let scene = scene_with(&model, ResolvedResources::new());
        let strategy = DirectDrawStrategy::new();

        for scale in [1.0f32, 2.0, 3.0, 4.0] {
            let buffer = strategy.render(&scene, scale).unwrap();
            assert_eq!(buffer.width(), (350.0 * scale) as u32);
            assert_eq!(buffer.height(), (500.0 * scale) as u32);
        }
    }

    #[test]
    fn background_image_is_cover_fitted_over_the_full_canvas() {
        let mut model = LayoutModel::new();
        model.set_background("bg");

        let mut resources = ResolvedResources::new();
        resources.insert_image("bg", RgbaImage::from_pixel(10, 10, Rgba([30, 60, 90, 255])));

        let buffer = DirectDrawStrategy::new()
            .render(&scene_with(&model, resources), 2.0)
            .unwrap();

        assert_eq!(buffer.width(), 700);
        assert_eq!(buffer.height(), 1000);
        assert_eq!(buffer.data.get_pixel(350, 500).0, [30, 60, 90, 255]);
        assert_eq!(buffer.data.get_pixel(0, 0).0, [30, 60, 90, 255]);
    }

    #[test]
    fn missing_background_paints_the_placeholder_tone() {
        let mut model = LayoutModel::new();
        model.set_background("gone");

        let buffer = DirectDrawStrategy::new()
            .render(&scene_with(&model, ResolvedResources::new()), 1.0)
            .unwrap();

        let expected = placeholder_tone(BACKGROUND_PLACEHOLDER_DEPTH);
        assert_eq!(buffer.data.get_pixel(0, 0).0, expected.0);
        assert_eq!(buffer.data.get_pixel(349, 499).0, expected.0);
    }

    #[test]
    fn avatar_renders_as_a_disc_not_a_square() {
        let mut model = LayoutModel::new();
        model.set_avatar(AvatarConfig::new(100.0, Position::new(100.0, 100.0)));

        let buffer = DirectDrawStrategy::new()
            .render(&scene_with(&model, ResolvedResources::new()), 1.0)
            .unwrap();

        let tone = placeholder_tone(AVATAR_PLACEHOLDER_DEPTH);
        // Disc center is tinted.
        assert_eq!(buffer.data.get_pixel(150, 150).0, tone.0);
        // The bounding-box corner stays the white base: masked out.
        assert_eq!(buffer.data.get_pixel(101, 101).0, [255, 255, 255, 255]);
    }

    #[test]
    fn image_module_paints_at_position_with_declared_box() {
        let mut model = LayoutModel::new();
        model.upsert_module(
            Module::image("logo", "logo-img", Position::new(10.0, 20.0)).with_size(30.0, 30.0),
        );

        let mut resources = ResolvedResources::new();
        resources.insert_image("logo-img", RgbaImage::from_pixel(6, 6, Rgba([200, 10, 10, 255])));

        let buffer = DirectDrawStrategy::new()
            .render(&scene_with(&model, resources), 1.0)
            .unwrap();

        assert_eq!(buffer.data.get_pixel(25, 35).0, [200, 10, 10, 255]);
        assert_eq!(buffer.data.get_pixel(5, 5).0, [255, 255, 255, 255]);
    }

    #[test]
    fn missing_image_module_paints_a_placeholder_box() {
        let mut model = LayoutModel::new();
        model.upsert_module(Module::image("logo", "gone", Position::new(0.0, 0.0)));

        let buffer = DirectDrawStrategy::new()
            .render(&scene_with(&model, ResolvedResources::new()), 1.0)
            .unwrap();

        let tone = placeholder_tone(IMAGE_PLACEHOLDER_DEPTH);
        assert_eq!(buffer.data.get_pixel(10, 10).0, tone.0);
    }

    #[test]
    fn text_without_font_degrades_to_a_clean_surface() {
        let mut model = LayoutModel::new();
        model.upsert_module(Module::text("name", "TEST", Position::new(160.0, 246.0)));

        // No font resolved: the module is skipped, nothing panics and the
        // buffer keeps its postcondition dimensions.
        let buffer = DirectDrawStrategy::new()
            .render(&scene_with(&model, ResolvedResources::new()), 2.0)
            .unwrap();
        assert_eq!(buffer.width(), 700);
        assert_eq!(buffer.height(), 1000);
    }

    #[test]
    fn group_children_are_offset_by_the_group_position() {
        let mut model = LayoutModel::new();
        model.upsert_module(Module::group(
            "badge",
            vec![Module::image("badge-icon", "dot", Position::new(5.0, 5.0)).with_size(4.0, 4.0)],
            Position::new(100.0, 200.0),
        ));

        let mut resources = ResolvedResources::new();
        resources.insert_image("dot", RgbaImage::from_pixel(4, 4, Rgba([0, 99, 0, 255])));

        let buffer = DirectDrawStrategy::new()
            .render(&scene_with(&model, resources), 1.0)
            .unwrap();

        assert_eq!(buffer.data.get_pixel(106, 206).0, [0, 99, 0, 255]);
    }
}
