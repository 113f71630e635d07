//! Card layout model: the live editing state and its frozen export snapshot.
//!
//! All positions are expressed in **canvas-space**, a fixed 350x500 logical
//! coordinate system that is independent of the export resolution. The
//! aspect ratio of canvas-space (0.7) is part of the stable contract and
//! every rasterization strategy must preserve it at every scale.
//!
//! A [`LayoutModel`] is the live, mutable state the editor (and the drag
//! controller) operates on. At export time it is frozen into a
//! [`LayoutSnapshot`] with [`LayoutModel::freeze`] — a plain deep copy, so
//! an in-flight export never observes later edits.
//!
//! # Example
//!
//! ```
//! use cardforge_renderer::{LayoutModel, Module, Position};
//!
//! let mut model = LayoutModel::new();
//! model.set_background("https://cards.example/bg.png");
//! model.upsert_module(Module::text("name", "Ada Lovelace", Position::new(160.0, 246.0)));
//!
//! let snapshot = model.freeze();
//! assert_eq!(snapshot.canvas_width, 350.0);
//! assert!(snapshot.modules.contains_key("name"));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Canvas-space width in logical units.
pub const CANVAS_WIDTH: f32 = 350.0;

/// Canvas-space height in logical units.
pub const CANVAS_HEIGHT: f32 = 500.0;

/// The canonical width/height ratio (0.7) every export must preserve.
pub const CANVAS_ASPECT: f32 = CANVAS_WIDTH / CANVAS_HEIGHT;

/// Reserved module id for the avatar (it lives in [`AvatarConfig`], not in
/// the module map, but the drag controller addresses it by this id).
pub const AVATAR_MODULE_ID: &str = "avatar";

/// Reserved module id for the phone number line, painted last in z-order.
pub const PHONE_MODULE_ID: &str = "phone";

// ============================================================================
// Position
// ============================================================================

/// A top-left offset in canvas-space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

// ============================================================================
// TextStyle
// ============================================================================

/// Visual style of a text module. Pure value type; a module's style is
/// never mutated once that module has been rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    /// Font size in canvas-space pixels (scaled with the export).
    pub font_size_px: f32,

    /// Fill color as a `#rrggbb` hex string.
    pub color: String,

    /// CSS-style numeric weight; 600 and above renders bold.
    pub font_weight: u16,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size_px: 16.0,
            color: "#333333".to_string(),
            font_weight: 400,
        }
    }
}

impl TextStyle {
    /// Parses the hex color into RGBA channels.
    ///
    /// Malformed colors fall back to opaque near-black rather than failing
    /// the render.
    pub fn rgba(&self) -> [u8; 4] {
        let hex = self.color.trim_start_matches('#');
        if hex.len() == 6 {
            if let Ok(v) = u32::from_str_radix(hex, 16) {
                return [(v >> 16) as u8, (v >> 8) as u8, v as u8, 255];
            }
        }
        [51, 51, 51, 255]
    }

    /// True when the weight should render as bold.
    pub fn is_bold(&self) -> bool {
        self.font_weight >= 600
    }
}

// ============================================================================
// Module
// ============================================================================

/// Discriminant of a module's content, part of the stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleKind {
    Text,
    Image,
    Group,
}

/// The payload of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleContent {
    /// Literal text, wrapped at the right canvas edge when rendered.
    Text(String),

    /// A referenced raster image (e.g. a logo). `width`/`height` give the
    /// display box in canvas units; when omitted the image renders at its
    /// natural size.
    Image {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<f32>,
    },

    /// Nested modules positioned relative to the group's own position.
    Group(Vec<Module>),
}

/// One absolutely-positioned element of the card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Unique within a layout.
    pub id: String,

    pub content: ModuleContent,

    /// Style applied when the content is text (ignored otherwise).
    #[serde(default)]
    pub style: TextStyle,

    /// Top-left offset in canvas-space.
    pub position: Position,

    /// An optional module renders only when its id appears in the
    /// snapshot's ability flags.
    #[serde(default)]
    pub optional: bool,
}

impl Module {
    /// Creates a text module with the default style.
    pub fn text(id: impl Into<String>, content: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            content: ModuleContent::Text(content.into()),
            style: TextStyle::default(),
            position,
            optional: false,
        }
    }

    /// Creates an image module rendered at its natural size.
    pub fn image(id: impl Into<String>, resource: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            content: ModuleContent::Image {
                resource: resource.into(),
                width: None,
                height: None,
            },
            style: TextStyle::default(),
            position,
            optional: false,
        }
    }

    /// Creates a group of nested modules.
    pub fn group(id: impl Into<String>, children: Vec<Module>, position: Position) -> Self {
        Self {
            id: id.into(),
            content: ModuleContent::Group(children),
            style: TextStyle::default(),
            position,
            optional: false,
        }
    }

    /// Sets the text style.
    pub fn with_style(mut self, style: TextStyle) -> Self {
        self.style = style;
        self
    }

    /// Sets the display box of an image module.
    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        if let ModuleContent::Image {
            width: w,
            height: h,
            ..
        } = &mut self.content
        {
            *w = Some(width);
            *h = Some(height);
        }
        self
    }

    /// Marks the module as optional (gated by ability flags).
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// The kind discriminant, derived from the content.
    pub fn kind(&self) -> ModuleKind {
        match self.content {
            ModuleContent::Text(_) => ModuleKind::Text,
            ModuleContent::Image { .. } => ModuleKind::Image,
            ModuleContent::Group(_) => ModuleKind::Group,
        }
    }
}

// ============================================================================
// AvatarConfig
// ============================================================================

/// The circular avatar: a special image module with its own size
/// independent of canvas scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarConfig {
    /// Diameter in canvas-space pixels.
    pub size_px: f32,

    /// Top-left corner of the avatar's bounding square.
    pub position: Position,

    /// Referenced image; `None` renders the placeholder disc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl AvatarConfig {
    pub fn new(size_px: f32, position: Position) -> Self {
        Self {
            size_px,
            position,
            image_ref: None,
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }
}

// ============================================================================
// LayoutSnapshot
// ============================================================================

/// Immutable-per-render copy of the card layout (aggregate root).
///
/// Produced by [`LayoutModel::freeze`] at the moment an export begins
/// (copy-on-export); never mutated afterwards. JSON-serializable with
/// camelCase field names so external editors and the persistence
/// collaborator can round-trip it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSnapshot {
    /// Fixed at 350; carried in the serialized form as part of the contract.
    #[serde(default = "default_canvas_width")]
    pub canvas_width: f32,

    /// Fixed at 500.
    #[serde(default = "default_canvas_height")]
    pub canvas_height: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarConfig>,

    pub modules: BTreeMap<String, Module>,

    /// Ids of optional modules that are enabled.
    #[serde(default)]
    pub ability_flags: BTreeSet<String>,

    /// Font resource used by text modules; `None` degrades text rendering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_ref: Option<String>,

    /// Family name advertised to the vector backend.
    #[serde(default = "default_font_family")]
    pub font_family: String,
}

fn default_canvas_width() -> f32 {
    CANVAS_WIDTH
}

fn default_canvas_height() -> f32 {
    CANVAS_HEIGHT
}

fn default_font_family() -> String {
    "sans-serif".to_string()
}

impl Default for LayoutSnapshot {
    fn default() -> Self {
        Self {
            canvas_width: CANVAS_WIDTH,
            canvas_height: CANVAS_HEIGHT,
            background_image_ref: None,
            avatar: None,
            modules: BTreeMap::new(),
            ability_flags: BTreeSet::new(),
            font_ref: None,
            font_family: default_font_family(),
        }
    }
}

impl LayoutSnapshot {
    /// Serializes the snapshot to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes a snapshot from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Every image resource the snapshot references: background, avatar,
    /// and any image module (groups walked recursively).
    pub fn image_refs(&self) -> Vec<String> {
        let mut refs = Vec::new();
        if let Some(bg) = &self.background_image_ref {
            refs.push(bg.clone());
        }
        if let Some(avatar) = &self.avatar {
            if let Some(r) = &avatar.image_ref {
                refs.push(r.clone());
            }
        }
        for module in self.visible_modules() {
            collect_image_refs(module, &mut refs);
        }
        refs
    }

    /// True when any visible module renders text (and therefore needs the
    /// font to be ready).
    pub fn uses_text(&self) -> bool {
        self.visible_modules().iter().any(|m| has_text(m))
    }

    /// The modules that should render, in paint order.
    ///
    /// Optional modules are filtered by the ability flags; the rest are
    /// ordered by the fixed z-order: image modules, then text, then
    /// enabled ability labels, then the phone line. Ties break on id so
    /// the order is deterministic.
    pub fn visible_modules(&self) -> Vec<&Module> {
        let mut visible: Vec<&Module> = self
            .modules
            .values()
            .filter(|m| !m.optional || self.ability_flags.contains(&m.id))
            .collect();
        visible.sort_by_key(|m| (z_rank(m), m.id.clone()));
        visible
    }
}

fn collect_image_refs(module: &Module, refs: &mut Vec<String>) {
    match &module.content {
        ModuleContent::Image { resource, .. } => refs.push(resource.clone()),
        ModuleContent::Group(children) => {
            for child in children {
                collect_image_refs(child, refs);
            }
        }
        ModuleContent::Text(_) => {}
    }
}

fn has_text(module: &Module) -> bool {
    match &module.content {
        ModuleContent::Text(_) => true,
        ModuleContent::Group(children) => children.iter().any(has_text),
        ModuleContent::Image { .. } => false,
    }
}

/// Paint rank within the module map. Background and avatar are painted
/// before any module; the phone line is always last.
fn z_rank(module: &Module) -> u8 {
    if module.id == PHONE_MODULE_ID {
        3
    } else if module.optional {
        2
    } else if module.kind() == ModuleKind::Image {
        0
    } else {
        1
    }
}

// ============================================================================
// LayoutModel
// ============================================================================

/// The live, mutable layout the editor session owns.
///
/// Mutations (including drags) apply here; exports read a frozen
/// [`LayoutSnapshot`] taken via [`freeze`](Self::freeze), so no export
/// ever observes a concurrent edit.
#[derive(Debug, Clone, Default)]
pub struct LayoutModel {
    state: LayoutSnapshot,
}

impl LayoutModel {
    /// Creates an empty card layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a model from a previously serialized snapshot.
    pub fn from_snapshot(snapshot: LayoutSnapshot) -> Self {
        Self { state: snapshot }
    }

    /// Freezes the current state into an immutable snapshot (copy-on-export).
    pub fn freeze(&self) -> LayoutSnapshot {
        self.state.clone()
    }

    pub fn set_background(&mut self, image_ref: impl Into<String>) {
        self.state.background_image_ref = Some(image_ref.into());
    }

    pub fn clear_background(&mut self) {
        self.state.background_image_ref = None;
    }

    pub fn set_avatar(&mut self, avatar: AvatarConfig) {
        self.state.avatar = Some(avatar);
    }

    pub fn avatar(&self) -> Option<&AvatarConfig> {
        self.state.avatar.as_ref()
    }

    pub(crate) fn avatar_mut(&mut self) -> Option<&mut AvatarConfig> {
        self.state.avatar.as_mut()
    }

    /// Inserts or replaces a module by id.
    pub fn upsert_module(&mut self, module: Module) {
        self.state.modules.insert(module.id.clone(), module);
    }

    pub fn remove_module(&mut self, id: &str) -> Option<Module> {
        self.state.modules.remove(id)
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.state.modules.get(id)
    }

    pub(crate) fn module_mut(&mut self, id: &str) -> Option<&mut Module> {
        self.state.modules.get_mut(id)
    }

    /// Enables or disables an optional module by id.
    pub fn set_ability(&mut self, id: impl Into<String>, enabled: bool) {
        let id = id.into();
        if enabled {
            self.state.ability_flags.insert(id);
        } else {
            self.state.ability_flags.remove(&id);
        }
    }

    /// Sets the font resource and family used by text modules.
    pub fn set_font(&mut self, font_ref: impl Into<String>, family: impl Into<String>) {
        self.state.font_ref = Some(font_ref.into());
        self.state.font_family = family.into();
    }
}

// ============================================================================
// Tests
// ============================================================================
