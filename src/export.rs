//! Export coordinator: gate → strategy → verify → fallback → encode.
//!
//! One export at a time: concurrent calls queue on an async mutex rather
//! than interleaving, so two exports can never race over the same
//! resource cache. Within one export the strategies run strictly
//! sequentially in a fixed priority order (direct-draw → vector →
//! snapshot); a strategy error and a verifier rejection are treated
//! identically — record the reason, advance to the next backend. Only
//! [`Error::AllStrategiesExhausted`], an encode failure that survived its
//! retry, and cancellation ever reach the caller.
//!
//! Cancellation is only honored while preparing or while the resource
//! gate is pending; a strategy that has started rendering runs to
//! completion and a late cancel merely discards its result.

use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage, RgbaImage};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result, StrategyFailure};
use crate::layout::{LayoutModel, LayoutSnapshot};
use crate::resource::{DEFAULT_IMAGE_TIMEOUT, ResourceGate, ResourceLoader};
use crate::strategy::{
    DirectDrawStrategy, PixelBuffer, PreviewSource, RenderStrategy, Scene, SnapshotStrategy,
    StrategyKind, VectorStrategy, png_bytes,
};
use crate::verify::{Verifier, VerifierConfig};

// ============================================================================
// Request / result types
// ============================================================================

/// Target encoding of the exported bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// One export order: a frozen snapshot plus output parameters.
///
/// Created fresh per export call, never mutated, and owned by the
/// coordinator for the lifetime of that export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub snapshot: LayoutSnapshot,
    pub format: ExportFormat,
    pub scale: f32,
}

impl ExportRequest {
    /// Builds a request. Scales below 1 are clamped up to 1.
    pub fn new(snapshot: LayoutSnapshot, format: ExportFormat, scale: f32) -> Self {
        Self {
            snapshot,
            format,
            scale: scale.max(1.0),
        }
    }

    /// Freezes the live model and builds a request from the copy
    /// (copy-on-export).
    pub fn from_model(model: &LayoutModel, format: ExportFormat, scale: f32) -> Self {
        Self::new(model.freeze(), format, scale)
    }
}

/// The finished export. Ownership transfers to the caller (the external
/// "save" collaborator).
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Which backend produced the buffer, for diagnostics/telemetry.
    pub strategy_used: StrategyKind,
    pub format: ExportFormat,
}

impl ExportResult {
    /// Filename to hand the save collaborator alongside the bytes.
    pub fn suggested_filename(&self, stem: &str) -> String {
        format!("{stem}.{}", self.format.extension())
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Observable coordinator state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Preparing,
    Rendering(StrategyKind),
    Verifying(StrategyKind),
    Retrying,
    Succeeded,
    Failed,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation handle for one export.
///
/// Effective only while the export is preparing or waiting on the
/// resource gate; rendering is not preemptible.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: never resolves.
                std::future::pending::<()>().await;
            }
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Coordinator tuning knobs with conservative defaults.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Per-resource load timeout applied by the readiness gate.
    pub image_timeout: std::time::Duration,

    /// JPEG quality factor for the first encode attempt.
    pub jpeg_quality: u8,

    /// Lowest quality the encode retry may use; below this, banding gets
    /// visible.
    pub jpeg_quality_floor: u8,

    pub verifier: VerifierConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
            jpeg_quality: 90,
            jpeg_quality_floor: 70,
            verifier: VerifierConfig::default(),
        }
    }
}

// ============================================================================
// ExportCoordinator
// ============================================================================

/// Drives a card export through the state machine.
pub struct ExportCoordinator<L> {
    config: CoordinatorConfig,
    gate: ResourceGate<L>,
    strategies: Vec<Box<dyn RenderStrategy>>,
    verifier: Verifier,
    lock: tokio::sync::Mutex<()>,
    state: std::sync::Mutex<ExportState>,
}

impl<L: ResourceLoader> ExportCoordinator<L> {
    /// Creates a coordinator with the default backends: direct-draw,
    /// then vector. Install the snapshot backend with
    /// [`with_preview_source`](Self::with_preview_source) when a live
    /// preview exists.
    pub fn new(loader: L) -> Self {
        let config = CoordinatorConfig::default();
        Self {
            gate: ResourceGate::new(loader).with_timeout(config.image_timeout),
            strategies: vec![
                Box::new(DirectDrawStrategy::new()),
                Box::new(VectorStrategy::new()),
            ],
            verifier: Verifier::new(config.verifier),
            config,
            lock: tokio::sync::Mutex::new(()),
            state: std::sync::Mutex::new(ExportState::Idle),
        }
    }

    /// Appends the snapshot backend, fed by the editor's live preview.
    pub fn with_preview_source(mut self, source: Box<dyn PreviewSource>) -> Self {
        self.strategies.push(Box::new(SnapshotStrategy::new(source)));
        self
    }

    /// Replaces the strategy chain (priority order = vector order).
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn RenderStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.gate = self.gate.with_timeout(config.image_timeout);
        self.verifier = Verifier::new(config.verifier);
        self.config = config;
        self
    }

    /// Current state machine position.
    pub fn state(&self) -> ExportState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ExportState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Runs one export to completion.
    pub async fn export(&self, request: ExportRequest) -> Result<ExportResult> {
        self.export_with_cancel(request, &CancelSignal::new()).await
    }

    /// Runs one export, honoring `cancel` until rendering begins.
    pub async fn export_with_cancel(
        &self,
        request: ExportRequest,
        cancel: &CancelSignal,
    ) -> Result<ExportResult> {
        // Single export in flight; later callers queue here.
        let _in_flight = self.lock.lock().await;

        self.set_state(ExportState::Preparing);
        if cancel.is_cancelled() {
            self.set_state(ExportState::Idle);
            return Err(Error::Cancelled);
        }

        let resources = tokio::select! {
            resolved = self.gate.await_ready(&request.snapshot) => resolved,
            _ = cancel.cancelled() => {
                debug!("export cancelled while awaiting resources");
                self.set_state(ExportState::Idle);
                return Err(Error::Cancelled);
            }
        };

        let scene = Scene::new(request.snapshot, resources);
        let mut failures: Vec<StrategyFailure> = Vec::new();

        for strategy in &self.strategies {
            let kind = strategy.kind();
            self.set_state(ExportState::Rendering(kind));
            info!("rendering with {kind} at scale {}", request.scale);

            // Not preemptible from here: the strategy runs to completion.
            let buffer = match strategy.render(&scene, request.scale) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!("{kind} failed: {e}");
                    failures.push(StrategyFailure {
                        strategy: kind,
                        reason: e.to_string(),
                    });
                    self.set_state(ExportState::Retrying);
                    continue;
                }
            };

            self.set_state(ExportState::Verifying(kind));
            if let Err(rejection) = self.verifier.verify(&buffer) {
                warn!("{kind} output rejected: {rejection}");
                failures.push(StrategyFailure {
                    strategy: kind,
                    reason: rejection.to_string(),
                });
                self.set_state(ExportState::Retrying);
                continue;
            }

            let bytes = match self.encode(&buffer, request.format) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.set_state(ExportState::Failed);
                    return Err(e);
                }
            };

            if cancel.is_cancelled() {
                debug!("export cancelled after rendering; discarding result");
                self.set_state(ExportState::Idle);
                return Err(Error::Cancelled);
            }

            info!("export succeeded via {kind}");
            self.set_state(ExportState::Succeeded);
            return Ok(ExportResult {
                width: buffer.width(),
                height: buffer.height(),
                bytes,
                strategy_used: kind,
                format: request.format,
            });
        }

        self.set_state(ExportState::Failed);
        Err(Error::AllStrategiesExhausted(failures))
    }

    fn encode(&self, buffer: &PixelBuffer, format: ExportFormat) -> Result<Vec<u8>> {
        match format {
            ExportFormat::Png => {
                png_bytes(&buffer.data).map_err(|e| Error::EncodeFailure(e.to_string()))
            }
            ExportFormat::Jpeg => {
                // JPEG carries no alpha: flatten onto white first.
                let rgb = flatten_onto_white(&buffer.data);
                match encode_jpeg(&rgb, self.config.jpeg_quality) {
                    Ok(bytes) => Ok(bytes),
                    Err(first) => {
                        let retry_quality = self
                            .config
                            .jpeg_quality
                            .saturating_sub(10)
                            .max(self.config.jpeg_quality_floor);
                        warn!(
                            "jpeg encode failed at quality {} ({first}); retrying at {retry_quality}",
                            self.config.jpeg_quality
                        );
                        encode_jpeg(&rgb, retry_quality)
                            .map_err(|e| Error::EncodeFailure(format!("{first}; retry: {e}")))
                    }
                }
            }
        }
    }
}

fn flatten_onto_white(img: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(img.width(), img.height());
    for (dst, src) in out.pixels_mut().zip(img.pixels()) {
        let alpha = src[3] as u32;
        for channel in 0..3 {
            dst[channel] = ((src[channel] as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        }
    }
    out
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> std::result::Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{AvatarConfig, Module, Position};
    use crate::resource::{LoadError, MemoryLoader};
    use crate::strategy::scaled_dims;
    use image::Rgba;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Two-tone background so the verifier sees real content.
    fn background_png() -> Vec<u8> {
        let mut img = RgbaImage::from_pixel(20, 20, Rgba([230, 230, 230, 255]));
        for y in 0..10 {
            for x in 0..20 {
                img.put_pixel(x, y, Rgba([20, 20, 20, 255]));
            }
        }
        png_bytes(&img).unwrap()
    }

    fn model_scenario_a() -> LayoutModel {
        let mut model = LayoutModel::new();
        model.set_background("bg");
        model.upsert_module(Module::text("name", "TEST", Position::new(160.0, 246.0)));
        model
    }

    fn loader_with_background() -> MemoryLoader {
        let mut loader = MemoryLoader::new();
        loader.insert("bg", background_png());
        loader
    }

    struct StubStrategy {
        kind: StrategyKind,
        fail: bool,
    }

    impl RenderStrategy for StubStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn render(&self, _scene: &Scene, scale: f32) -> Result<PixelBuffer> {
            if self.fail {
                return Err(Error::Render("simulated failure".to_string()));
            }
            let (w, h) = scaled_dims(scale);
            let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
            for y in 0..h / 4 {
                for x in 0..w / 4 {
                    img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
            Ok(PixelBuffer::new(img))
        }
    }

    fn failing(kind: StrategyKind) -> Box<dyn RenderStrategy> {
        Box::new(StubStrategy { kind, fail: true })
    }

    fn succeeding(kind: StrategyKind) -> Box<dyn RenderStrategy> {
        Box::new(StubStrategy { kind, fail: false })
    }

    #[tokio::test]
    async fn scenario_a_background_and_name_at_scale_two() {
        init_logs();
        let coordinator = ExportCoordinator::new(loader_with_background());
        let request =
            ExportRequest::from_model(&model_scenario_a(), ExportFormat::Png, 2.0);

        let result = coordinator.export(request).await.unwrap();

        assert_eq!(result.width, 700);
        assert_eq!(result.height, 1000);
        assert_eq!(result.strategy_used, StrategyKind::DirectDraw);
        assert!(result.bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        assert_eq!(coordinator.state(), ExportState::Succeeded);
    }

    #[tokio::test]
    async fn scenario_b_missing_background_degrades_to_placeholder() {
        // The background URL "404s": nothing registered in the loader.
        let mut model = model_scenario_a();
        model.set_avatar(AvatarConfig::new(80.0, Position::new(135.0, 60.0)));

        let coordinator = ExportCoordinator::new(MemoryLoader::new());
        let request = ExportRequest::from_model(&model, ExportFormat::Png, 1.0);

        let result = coordinator.export(request).await.unwrap();

        // Full-size buffer despite the missing background; the avatar
        // placeholder supplies enough content to satisfy the verifier.
        assert_eq!(result.width, 350);
        assert_eq!(result.height, 500);
        assert_eq!(result.strategy_used, StrategyKind::DirectDraw);
    }

    #[tokio::test]
    async fn scenario_c_all_strategies_fail_with_three_reasons() {
        init_logs();
        let coordinator = ExportCoordinator::new(MemoryLoader::new()).with_strategies(vec![
            failing(StrategyKind::DirectDraw),
            failing(StrategyKind::Vector),
            failing(StrategyKind::Snapshot),
        ]);
        let request = ExportRequest::from_model(&LayoutModel::new(), ExportFormat::Png, 1.0);

        let err = coordinator.export(request).await.unwrap_err();

        match err {
            Error::AllStrategiesExhausted(failures) => {
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].strategy, StrategyKind::DirectDraw);
                assert_eq!(failures[1].strategy, StrategyKind::Vector);
                assert_eq!(failures[2].strategy, StrategyKind::Snapshot);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(coordinator.state(), ExportState::Failed);
    }

    #[tokio::test]
    async fn fallback_reaches_the_third_strategy() {
        let coordinator = ExportCoordinator::new(MemoryLoader::new()).with_strategies(vec![
            failing(StrategyKind::DirectDraw),
            failing(StrategyKind::Vector),
            succeeding(StrategyKind::Snapshot),
        ]);
        let request = ExportRequest::from_model(&LayoutModel::new(), ExportFormat::Png, 1.0);

        let result = coordinator.export(request).await.unwrap();
        assert_eq!(result.strategy_used, StrategyKind::Snapshot);
    }

    #[tokio::test]
    async fn in_flight_export_never_observes_later_edits() {
        let mut model = model_scenario_a();
        let frozen = model.freeze();

        let coordinator = ExportCoordinator::new(loader_with_background());

        // Reference bytes from the frozen layout.
        let reference = coordinator
            .export(ExportRequest::new(frozen.clone(), ExportFormat::Png, 1.0))
            .await
            .unwrap();

        // Mutate the live model; the previously frozen snapshot must
        // still export to identical bytes.
        model.upsert_module(Module::text("title", "CHANGED", Position::new(10.0, 10.0)));
        model.clear_background();

        let after_edit = coordinator
            .export(ExportRequest::new(frozen, ExportFormat::Png, 1.0))
            .await
            .unwrap();

        assert_eq!(reference.bytes, after_edit.bytes);
    }

    #[tokio::test]
    async fn concurrent_exports_queue_instead_of_interleaving() {
        let coordinator = ExportCoordinator::new(loader_with_background());
        let first = ExportRequest::from_model(&model_scenario_a(), ExportFormat::Png, 1.0);
        let second = ExportRequest::from_model(&model_scenario_a(), ExportFormat::Png, 2.0);

        let (a, b) = tokio::join!(coordinator.export(first), coordinator.export(second));

        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!((a.width, a.height), (350, 500));
        assert_eq!((b.width, b.height), (700, 1000));
    }

    #[tokio::test]
    async fn cancel_before_start_aborts_in_preparing() {
        let coordinator = ExportCoordinator::new(loader_with_background());
        let request = ExportRequest::from_model(&model_scenario_a(), ExportFormat::Png, 1.0);

        let signal = CancelSignal::new();
        signal.cancel();

        let err = coordinator
            .export_with_cancel(request, &signal)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(coordinator.state(), ExportState::Idle);
    }

    struct StalledLoader;

    impl ResourceLoader for StalledLoader {
        async fn fetch(&self, _reference: &str) -> std::result::Result<Vec<u8>, LoadError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancel_while_gate_is_pending_aborts_the_export() {
        let coordinator = ExportCoordinator::new(StalledLoader);
        let request = ExportRequest::from_model(&model_scenario_a(), ExportFormat::Png, 1.0);

        let signal = CancelSignal::new();
        let canceller = signal.clone();

        let (result, ()) = tokio::join!(coordinator.export_with_cancel(request, &signal), async {
            canceller.cancel();
        });

        assert!(matches!(result.unwrap_err(), Error::Cancelled));
    }

    #[tokio::test]
    async fn jpeg_export_produces_jfif_bytes() {
        let coordinator = ExportCoordinator::new(loader_with_background());
        let request = ExportRequest::from_model(&model_scenario_a(), ExportFormat::Jpeg, 1.0);

        let result = coordinator.export(request).await.unwrap();
        assert!(result.bytes.starts_with(&[0xFF, 0xD8]));
        assert_eq!(result.suggested_filename("card"), "card.jpg");
    }

    #[test]
    fn request_scale_is_clamped_to_at_least_one() {
        let request = ExportRequest::new(LayoutModel::new().freeze(), ExportFormat::Png, 0.25);
        assert_eq!(request.scale, 1.0);
    }

    #[test]
    fn suggested_filename_uses_the_format_extension() {
        let result = ExportResult {
            bytes: Vec::new(),
            width: 350,
            height: 500,
            strategy_used: StrategyKind::Vector,
            format: ExportFormat::Png,
        };
        assert_eq!(result.suggested_filename("my-card"), "my-card.png");
    }
}
