//! Pointer-driven repositioning of layout modules.
//!
//! The controller holds only the transient drag state (which module is
//! active and the pointer-to-position offset captured at drag start);
//! every call borrows the [`LayoutModel`] it mutates. Exports are never
//! affected: they operate on a frozen snapshot taken before rendering
//! begins.

use log::debug;

use crate::layout::{AVATAR_MODULE_ID, CANVAS_HEIGHT, CANVAS_WIDTH, LayoutModel, Position};

/// Minimum footprint kept inside the canvas for ordinary modules.
pub const MODULE_MIN_WIDTH: f32 = 24.0;
pub const MODULE_MIN_HEIGHT: f32 = 16.0;

/// Module ids that accept dragging. Everything else is display-only.
pub const DRAGGABLE_MODULE_IDS: &[&str] = &["name", "title", AVATAR_MODULE_ID, "logo"];

// ============================================================================
// DragController
// ============================================================================

#[derive(Debug, Clone)]
struct ActiveDrag {
    module_id: String,
    /// Pointer position minus module position, captured at drag start.
    offset: Position,
    /// Footprint used for the clamp bounds (the avatar uses its size).
    footprint: (f32, f32),
}

/// Translates pointer input into clamped module positions.
///
/// # Example
///
/// ```
/// use cardforge_renderer::{DragController, LayoutModel, Module, Position};
///
/// let mut model = LayoutModel::new();
/// model.upsert_module(Module::text("name", "Ada", Position::new(100.0, 100.0)));
///
/// let mut drag = DragController::new();
/// assert!(drag.begin_drag(&model, "name", 110.0, 105.0));
/// drag.update_drag(&mut model, 9000.0, -9000.0);
/// drag.end_drag();
///
/// let pos = model.module("name").unwrap().position;
/// assert!(pos.x <= 350.0 && pos.y == 0.0);
/// ```
#[derive(Debug, Default)]
pub struct DragController {
    active: Option<ActiveDrag>,
}

impl DragController {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a drag is in progress.
    pub fn is_dragging(&self) -> bool {
        self.active.is_some()
    }

    /// Starts dragging `module_id` from the given pointer position.
    ///
    /// Returns `false` (and ignores the gesture) when the module is not on
    /// the draggable allow-list or does not exist. Never errors: bad input
    /// is a no-op.
    pub fn begin_drag(
        &mut self,
        model: &LayoutModel,
        module_id: &str,
        pointer_x: f32,
        pointer_y: f32,
    ) -> bool {
        if !DRAGGABLE_MODULE_IDS.contains(&module_id) {
            debug!("ignoring drag on non-draggable module '{module_id}'");
            return false;
        }

        let (position, footprint) = if module_id == AVATAR_MODULE_ID {
            match model.avatar() {
                Some(avatar) => (avatar.position, (avatar.size_px, avatar.size_px)),
                None => return false,
            }
        } else {
            match model.module(module_id) {
                Some(module) => (module.position, (MODULE_MIN_WIDTH, MODULE_MIN_HEIGHT)),
                None => return false,
            }
        };

        self.active = Some(ActiveDrag {
            module_id: module_id.to_string(),
            offset: Position::new(pointer_x - position.x, pointer_y - position.y),
            footprint,
        });
        true
    }

    /// Moves the active module to follow the pointer, clamping both axes
    /// into the canvas. Out-of-range pointer input is silently clamped,
    /// never rejected. A call with no active drag is a no-op.
    pub fn update_drag(&mut self, model: &mut LayoutModel, pointer_x: f32, pointer_y: f32) {
        let Some(drag) = &self.active else {
            return;
        };

        let clamped = clamp_position(
            pointer_x - drag.offset.x,
            pointer_y - drag.offset.y,
            drag.footprint,
        );

        if drag.module_id == AVATAR_MODULE_ID {
            if let Some(avatar) = model.avatar_mut() {
                avatar.position = clamped;
            }
        } else if let Some(module) = model.module_mut(&drag.module_id) {
            module.position = clamped;
        }
    }

    /// Ends the drag gesture. The module keeps its last clamped position.
    pub fn end_drag(&mut self) {
        self.active = None;
    }
}

/// Clamps a candidate position so the module's footprint stays inside
/// canvas-space. Pure and idempotent: clamping an already-clamped position
/// returns it unchanged.
pub fn clamp_position(x: f32, y: f32, footprint: (f32, f32)) -> Position {
    let max_x = (CANVAS_WIDTH - footprint.0).max(0.0);
    let max_y = (CANVAS_HEIGHT - footprint.1).max(0.0);
    Position::new(x.clamp(0.0, max_x), y.clamp(0.0, max_y))
}

// ============================================================================
// Tests
// ============================================================================
