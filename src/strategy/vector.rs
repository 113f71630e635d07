//! Vector strategy: resolution-independent SVG markup, then rasterized.
//!
//! The layout is first emitted as SVG in canvas-space (350x500 viewBox)
//! with raster resources embedded as base64 data URIs, then parsed and
//! rendered through `resvg` at the requested scale. Text goes through the
//! markup engine's own shaping, which makes this the most precise text
//! backend, and [`VectorStrategy::emit_markup`] is public so callers that
//! do not need a bitmap can take the markup itself.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{Rgba, RgbaImage};
use log::warn;
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{Options, Tree};

use super::{
    PixelBuffer, RenderStrategy, Scene, StrategyKind, placeholder_tone, png_bytes, scaled_dims,
};
use crate::error::{Error, Result};
use crate::layout::{Module, ModuleContent};

const BACKGROUND_PLACEHOLDER_DEPTH: f32 = 0.04;
const IMAGE_PLACEHOLDER_DEPTH: f32 = 0.08;
const AVATAR_PLACEHOLDER_DEPTH: f32 = 0.12;
const FALLBACK_IMAGE_BOX: f32 = 48.0;

// ============================================================================
// VectorStrategy
// ============================================================================

/// Second-priority backend: emit markup, rasterize with `resvg`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorStrategy;

impl VectorStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Emits the scene as standalone SVG markup in canvas-space.
    ///
    /// This is the un-rasterized artifact: resolution-independent, with
    /// images inlined as data URIs and missing resources replaced by
    /// placeholder shapes.
    pub fn emit_markup(&self, scene: &Scene) -> String {
        let snapshot = &scene.snapshot;
        let w = snapshot.canvas_width;
        let h = snapshot.canvas_height;

        let mut svg = String::with_capacity(4096);
        svg.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" \
             width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">"
        ));

        // Opaque base so the raster matches the direct backend's surface.
        svg.push_str(&format!(
            "<rect width=\"{w}\" height=\"{h}\" fill=\"#ffffff\"/>"
        ));

        self.emit_background(scene, &mut svg, w, h);
        self.emit_avatar(scene, &mut svg);
        for module in snapshot.visible_modules() {
            emit_module(scene, module, &mut svg);
        }

        svg.push_str("</svg>");
        svg
    }

    fn emit_background(&self, scene: &Scene, svg: &mut String, w: f32, h: f32) {
        let Some(reference) = &scene.snapshot.background_image_ref else {
            return;
        };
        match scene.resources.image(reference).and_then(data_uri) {
            Some(uri) => svg.push_str(&format!(
                "<image x=\"0\" y=\"0\" width=\"{w}\" height=\"{h}\" \
                 preserveAspectRatio=\"xMidYMid slice\" xlink:href=\"{uri}\"/>"
            )),
            None => svg.push_str(&format!(
                "<rect width=\"{w}\" height=\"{h}\" fill=\"{}\"/>",
                hex(placeholder_tone(BACKGROUND_PLACEHOLDER_DEPTH))
            )),
        }
    }

    fn emit_avatar(&self, scene: &Scene, svg: &mut String) {
        let Some(avatar) = &scene.snapshot.avatar else {
            return;
        };
        let r = avatar.size_px / 2.0;
        let cx = avatar.position.x + r;
        let cy = avatar.position.y + r;

        match avatar
            .image_ref
            .as_ref()
            .and_then(|reference| scene.resources.image(reference))
            .and_then(data_uri)
        {
            Some(uri) => {
                svg.push_str(&format!(
                    "<defs><clipPath id=\"avatar-clip\">\
                     <circle cx=\"{cx}\" cy=\"{cy}\" r=\"{r}\"/>\
                     </clipPath></defs>"
                ));
                svg.push_str(&format!(
                    "<image x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" \
                     preserveAspectRatio=\"xMidYMid slice\" \
                     clip-path=\"url(#avatar-clip)\" xlink:href=\"{uri}\"/>",
                    avatar.position.x, avatar.position.y, avatar.size_px, avatar.size_px
                ));
            }
            None => svg.push_str(&format!(
                "<circle cx=\"{cx}\" cy=\"{cy}\" r=\"{r}\" fill=\"{}\"/>",
                hex(placeholder_tone(AVATAR_PLACEHOLDER_DEPTH))
            )),
        }
    }
}

impl RenderStrategy for VectorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vector
    }

    fn render(&self, scene: &Scene, scale: f32) -> Result<PixelBuffer> {
        let markup = self.emit_markup(scene);
        rasterize(&markup, scene, scale)
    }
}

// ============================================================================
// Module markup
// ============================================================================

fn emit_module(scene: &Scene, module: &Module, svg: &mut String) {
    let x = module.position.x;
    let y = module.position.y;

    match &module.content {
        ModuleContent::Text(text) => {
            let style = &module.style;
            let size = style.font_size_px;
            let family = escape_xml(&scene.snapshot.font_family);
            // No auto-wrap in SVG: one <text> per explicit line, advanced
            // by a fixed line height.
            for (i, line) in text.split('\n').enumerate() {
                let line_y = y + size * 0.8 + i as f32 * size * 1.2;
                svg.push_str(&format!(
                    "<text x=\"{x}\" y=\"{line_y}\" font-family=\"{family}\" \
                     font-size=\"{size}\" font-weight=\"{}\" fill=\"{}\">{}</text>",
                    style.font_weight,
                    escape_xml(&style.color),
                    escape_xml(line)
                ));
            }
        }
        ModuleContent::Image {
            resource,
            width,
            height,
        } => match scene.resources.image(resource) {
            Some(img) => {
                let (bw, bh) = match (width, height) {
                    (Some(w), Some(h)) => (*w, *h),
                    _ => (img.width() as f32, img.height() as f32),
                };
                match data_uri(img) {
                    Some(uri) => svg.push_str(&format!(
                        "<image x=\"{x}\" y=\"{y}\" width=\"{bw}\" height=\"{bh}\" \
                         preserveAspectRatio=\"xMidYMid slice\" xlink:href=\"{uri}\"/>"
                    )),
                    None => emit_placeholder_rect(svg, x, y, bw, bh),
                }
            }
            None => {
                let bw = width.unwrap_or(FALLBACK_IMAGE_BOX);
                let bh = height.unwrap_or(FALLBACK_IMAGE_BOX);
                emit_placeholder_rect(svg, x, y, bw, bh);
            }
        },
        ModuleContent::Group(children) => {
            svg.push_str(&format!("<g transform=\"translate({x},{y})\">"));
            for child in children {
                emit_module(scene, child, svg);
            }
            svg.push_str("</g>");
        }
    }
}

fn emit_placeholder_rect(svg: &mut String, x: f32, y: f32, w: f32, h: f32) {
    svg.push_str(&format!(
        "<rect x=\"{x}\" y=\"{y}\" width=\"{w}\" height=\"{h}\" fill=\"{}\"/>",
        hex(placeholder_tone(IMAGE_PLACEHOLDER_DEPTH))
    ));
}

// ============================================================================
// Rasterization
// ============================================================================

fn rasterize(markup: &str, scene: &Scene, scale: f32) -> Result<PixelBuffer> {
    let mut options = Options::default();
    options.font_family = scene.snapshot.font_family.clone();
    if let Some(font) = scene.resources.font() {
        options.fontdb_mut().load_font_data(font.data.clone());
    }

    let tree = Tree::from_str(markup, &options)
        .map_err(|e| Error::Render(format!("markup did not parse: {e}")))?;

    let (width, height) = scaled_dims(scale);
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| Error::Render("could not allocate pixmap".to_string()))?;
    resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

    Ok(PixelBuffer::new(pixmap_to_rgba(&pixmap)))
}

/// Unpacks the premultiplied pixmap into a straight-alpha RGBA image.
fn pixmap_to_rgba(pixmap: &Pixmap) -> RgbaImage {
    let mut img = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in img.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    img
}

// ============================================================================
// Small helpers
// ============================================================================

fn data_uri(image: &RgbaImage) -> Option<String> {
    match png_bytes(image) {
        Ok(bytes) => Some(format!("data:image/png;base64,{}", BASE64.encode(bytes))),
        Err(e) => {
            warn!("could not inline image into markup: {e}");
            None
        }
    }
}

fn hex(color: Rgba<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
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
    fn markup_declares_canvas_space_viewbox() {
        let scene = scene_with(&LayoutModel::new(), ResolvedResources::new());
        let markup = VectorStrategy::new().emit_markup(&scene);

        assert!(markup.starts_with("<svg"), "got: {markup}");
        assert!(markup.contains("viewBox=\"0 0 350 500\""), "got: {markup}");
    }

    #[test]
    fn text_modules_become_escaped_text_elements() {
        let mut model = LayoutModel::new();
        model.upsert_module(Module::text("name", "R&D <Team>", Position::new(160.0, 246.0)));

        let markup = VectorStrategy::new().emit_markup(&scene_with(&model, ResolvedResources::new()));

        assert!(markup.contains("<text x=\"160\""), "got: {markup}");
        assert!(markup.contains("R&amp;D &lt;Team&gt;"), "got: {markup}");
        assert!(!markup.contains("R&D <Team>"));
    }

    #[test]
    fn available_background_is_inlined_as_data_uri() {
        let mut model = LayoutModel::new();
        model.set_background("bg");

        let mut resources = ResolvedResources::new();
        resources.insert_image("bg", RgbaImage::from_pixel(4, 4, Rgba([50, 100, 150, 255])));

        let markup = VectorStrategy::new().emit_markup(&scene_with(&model, resources));
        assert!(markup.contains("data:image/png;base64,"), "got: {markup}");
        assert!(markup.contains("xMidYMid slice"));
    }

    #[test]
    fn missing_background_emits_placeholder_rect() {
        let mut model = LayoutModel::new();
        model.set_background("gone");

        let markup =
            VectorStrategy::new().emit_markup(&scene_with(&model, ResolvedResources::new()));
        let tone = hex(placeholder_tone(BACKGROUND_PLACEHOLDER_DEPTH));
        assert!(markup.contains(&tone), "got: {markup}");
        assert!(!markup.contains("data:image/png"));
    }

    #[test]
    fn avatar_with_image_is_clipped_to_a_circle() {
        let mut model = LayoutModel::new();
        model.set_avatar(AvatarConfig::new(80.0, Position::new(135.0, 60.0)).with_image("face"));

        let mut resources = ResolvedResources::new();
        resources.insert_image("face", RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));

        let markup = VectorStrategy::new().emit_markup(&scene_with(&model, resources));
        assert!(markup.contains("clipPath id=\"avatar-clip\""), "got: {markup}");
        assert!(markup.contains("clip-path=\"url(#avatar-clip)\""));
    }

    #[test]
    fn rasterized_output_tracks_scale_exactly() {
        let scene = scene_with(&LayoutModel::new(), ResolvedResources::new());
        let strategy = VectorStrategy::new();

        for scale in [1.0f32, 2.0, 3.0, 4.0] {
            let buffer = strategy.render(&scene, scale).unwrap();
            assert_eq!(buffer.width(), (350.0 * scale) as u32);
            assert_eq!(buffer.height(), (500.0 * scale) as u32);
        }
    }

    #[test]
    fn rasterized_background_covers_the_canvas() {
        let mut model = LayoutModel::new();
        model.set_background("bg");

        let mut resources = ResolvedResources::new();
        resources.insert_image("bg", RgbaImage::from_pixel(8, 8, Rgba([50, 100, 150, 255])));

        let buffer = VectorStrategy::new()
            .render(&scene_with(&model, resources), 2.0)
            .unwrap();

        assert_eq!(buffer.width(), 700);
        assert_eq!(buffer.height(), 1000);
        let center = buffer.data.get_pixel(350, 500);
        assert_eq!(center.0[3], 255);
        assert!(
            center.0[2] > center.0[0],
            "blue-dominant background expected, got {:?}",
            center.0
        );
    }
}
