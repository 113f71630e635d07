//! cardforge-renderer: card layout & export rendering engine.
//!
//! This crate holds an absolutely-positioned card layout (background
//! image, circular avatar, draggable text modules) and deterministically
//! converts it into a fixed-aspect-ratio raster image. Three independent
//! rasterization backends share one contract and feed a fallback chain:
//!
//! - **Direct-Draw** — manual pixel compositing with its own text layout
//! - **Vector** — SVG markup, rasterized with `resvg` (also available
//!   un-rasterized)
//! - **Snapshot** — one-shot capture of the editor's live preview
//!
//! The export coordinator freezes the live layout (copy-on-export),
//! waits on the resource readiness gate, runs the backends in priority
//! order until the output verifier accepts a buffer, and encodes the
//! result to PNG or JPEG.
//!
//! # Example: layout and vector markup
//!
//! ```
//! use cardforge_renderer::{
//!     LayoutModel, Module, Position, ResolvedResources, Scene, VectorStrategy,
//! };
//!
//! let mut model = LayoutModel::new();
//! model.upsert_module(Module::text("name", "Ada Lovelace", Position::new(160.0, 246.0)));
//!
//! let scene = Scene::new(model.freeze(), ResolvedResources::new());
//! let markup = VectorStrategy::new().emit_markup(&scene);
//! assert!(markup.contains("Ada Lovelace"));
//! ```
//!
//! # Example: full export
//!
//! ```no_run
//! use cardforge_renderer::{
//!     ExportCoordinator, ExportFormat, ExportRequest, LayoutModel, MemoryLoader,
//! };
//!
//! # async fn run() -> cardforge_renderer::Result<()> {
//! let model = LayoutModel::new();
//! let coordinator = ExportCoordinator::new(MemoryLoader::new());
//!
//! let request = ExportRequest::from_model(&model, ExportFormat::Png, 2.0);
//! let result = coordinator.export(request).await?;
//!
//! // Hand bytes + filename to the external save collaborator.
//! let _filename = result.suggested_filename("card");
//! # Ok(())
//! # }
//! ```

mod drag;
mod error;
mod export;
mod layout;
mod resource;
mod strategy;
mod verify;

pub use drag::{
    DRAGGABLE_MODULE_IDS, DragController, MODULE_MIN_HEIGHT, MODULE_MIN_WIDTH, clamp_position,
};
pub use error::{Error, Result, StrategyFailure};
pub use export::{
    CancelSignal, CoordinatorConfig, ExportCoordinator, ExportFormat, ExportRequest, ExportResult,
    ExportState,
};
pub use layout::{
    AVATAR_MODULE_ID, AvatarConfig, CANVAS_ASPECT, CANVAS_HEIGHT, CANVAS_WIDTH, LayoutModel,
    LayoutSnapshot, Module, ModuleContent, ModuleKind, PHONE_MODULE_ID, Position, TextStyle,
};
#[cfg(feature = "http-loader")]
pub use resource::HttpLoader;
pub use resource::{
    DEFAULT_IMAGE_TIMEOUT, LoadError, LoadedFont, MemoryLoader, MissingReason, ResolvedResources,
    ResourceGate, ResourceLoader,
};
pub use strategy::{
    DirectDrawStrategy, PixelBuffer, PreviewSource, RenderStrategy, Scene, SnapshotStrategy,
    StrategyKind, VectorStrategy,
};
pub use verify::{Rejection, Verifier, VerifierConfig};
