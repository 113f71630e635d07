//! Resource readiness gate: images and fonts must settle before rendering.
//!
//! An export must not start painting while the background is half-fetched
//! or the font is not yet parsed, but it also must not hang forever on a
//! dead URL. The gate therefore waits until every referenced resource has
//! either fully decoded or **definitively failed**: each image load gets an
//! independent timeout, and a timed-out or failed load resolves the gate
//! with a "missing" flag instead of rejecting it. A partially-broken export
//! (placeholder background) is preferable to one that never finishes.
//!
//! Loads within one gate run concurrently; the gate suspends only the
//! calling export flow, never the editor.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::future::join_all;
use image::RgbaImage;
use log::{debug, warn};
use thiserror::Error;
use tokio::time::timeout;

use crate::layout::LayoutSnapshot;

/// Default per-resource load timeout.
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(20);

// ============================================================================
// ResourceLoader
// ============================================================================

/// Error produced by a [`ResourceLoader`].
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Fetches raw resource bytes by reference.
///
/// The engine performs no I/O of its own beyond this seam: embedders pick
/// a loader (in-memory, HTTP, or their own) and the gate layers timeouts,
/// decoding, and missing-flag semantics on top.
#[allow(async_fn_in_trait)]
pub trait ResourceLoader {
    /// Resolves a resource reference to its raw bytes.
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, LoadError>;
}

/// In-memory loader for tests and embedders that pre-fetch resources.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers bytes under a reference key.
    pub fn insert(&mut self, reference: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(reference.into(), bytes);
    }
}

impl ResourceLoader for MemoryLoader {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, LoadError> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(reference.to_string()))
    }
}

/// HTTP loader backed by `reqwest`, available with the `http-loader`
/// feature.
#[cfg(feature = "http-loader")]
#[derive(Debug, Clone, Default)]
pub struct HttpLoader {
    client: reqwest::Client,
}

#[cfg(feature = "http-loader")]
impl HttpLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "http-loader")]
impl ResourceLoader for HttpLoader {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, LoadError> {
        let response = self
            .client
            .get(reference)
            .send()
            .await
            .map_err(|e| LoadError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LoadError::NotFound(format!(
                "{} returned {}",
                reference,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoadError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// ResolvedResources
// ============================================================================

/// Why a resource ended up missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingReason {
    /// The load did not settle within the per-resource timeout.
    Timeout,
    /// The loader reported a definitive failure (404, transport error).
    Load(String),
    /// Bytes arrived but could not be decoded/parsed.
    Decode(String),
}

impl std::fmt::Display for MissingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Load(e) => write!(f, "load failed: {e}"),
            Self::Decode(e) => write!(f, "decode failed: {e}"),
        }
    }
}

/// A font that reported ready: fetched and parsed.
pub struct LoadedFont {
    /// Family name advertised to the vector backend.
    pub family: String,
    /// Raw bytes, kept so the vector backend can feed its own font
    /// database.
    pub data: Vec<u8>,
    pub font: fontdue::Font,
}

/// Everything the gate settled: decoded images keyed by reference,
/// missing flags for everything that failed, and the parsed font.
#[derive(Default)]
pub struct ResolvedResources {
    images: BTreeMap<String, RgbaImage>,
    missing: BTreeMap<String, MissingReason>,
    font: Option<LoadedFont>,
    font_missing: Option<MissingReason>,
}

impl ResolvedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-decoded image (embedders that decode upstream).
    pub fn insert_image(&mut self, reference: impl Into<String>, image: RgbaImage) {
        self.images.insert(reference.into(), image);
    }

    /// Flags a reference as missing.
    pub fn mark_missing(&mut self, reference: impl Into<String>, reason: MissingReason) {
        self.missing.insert(reference.into(), reason);
    }

    /// Installs an already-fetched font. Parse failure sets the missing
    /// flag instead of erroring; text rendering then degrades.
    pub fn set_font(&mut self, family: impl Into<String>, data: Vec<u8>) {
        match fontdue::Font::from_bytes(data.as_slice(), fontdue::FontSettings::default()) {
            Ok(font) => {
                self.font = Some(LoadedFont {
                    family: family.into(),
                    data,
                    font,
                });
                self.font_missing = None;
            }
            Err(e) => {
                self.font = None;
                self.font_missing = Some(MissingReason::Decode(e.to_string()));
            }
        }
    }

    pub fn image(&self, reference: &str) -> Option<&RgbaImage> {
        self.images.get(reference)
    }

    pub fn is_missing(&self, reference: &str) -> bool {
        self.missing.contains_key(reference)
    }

    /// Missing flags by reference, for diagnostics.
    pub fn missing(&self) -> &BTreeMap<String, MissingReason> {
        &self.missing
    }

    pub fn font(&self) -> Option<&LoadedFont> {
        self.font.as_ref()
    }

    pub fn font_missing(&self) -> Option<&MissingReason> {
        self.font_missing.as_ref()
    }
}

// ============================================================================
// ResourceGate
// ============================================================================

/// Awaits readiness of every resource a snapshot references.
pub struct ResourceGate<L> {
    loader: L,
    image_timeout: Duration,
}

impl<L: ResourceLoader> ResourceGate<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
        }
    }

    /// Overrides the per-resource timeout.
    pub fn with_timeout(mut self, image_timeout: Duration) -> Self {
        self.image_timeout = image_timeout;
        self
    }

    /// Resolves once every referenced image has decoded or definitively
    /// failed, and the font (when text modules need one) reports ready.
    ///
    /// Never rejects: failures become missing flags on the returned
    /// [`ResolvedResources`].
    pub async fn await_ready(&self, snapshot: &LayoutSnapshot) -> ResolvedResources {
        let mut resolved = ResolvedResources::new();

        // Each reference is fetched once even if used by several modules.
        let refs: BTreeSet<String> = snapshot.image_refs().into_iter().collect();

        let loads = refs.iter().map(|reference| {
            let reference = reference.clone();
            async move {
                let outcome = timeout(self.image_timeout, self.loader.fetch(&reference)).await;
                (reference, outcome)
            }
        });

        for (reference, outcome) in join_all(loads).await {
            match outcome {
                Err(_) => {
                    warn!(
                        "image '{reference}' timed out after {:?}",
                        self.image_timeout
                    );
                    resolved.mark_missing(reference, MissingReason::Timeout);
                }
                Ok(Err(e)) => {
                    warn!("image '{reference}' failed to load: {e}");
                    resolved.mark_missing(reference, MissingReason::Load(e.to_string()));
                }
                Ok(Ok(bytes)) => match image::load_from_memory(&bytes) {
                    Ok(decoded) => {
                        debug!("image '{reference}' ready ({} bytes)", bytes.len());
                        resolved.insert_image(reference, decoded.to_rgba8());
                    }
                    Err(e) => {
                        warn!("image '{reference}' failed to decode: {e}");
                        resolved.mark_missing(reference, MissingReason::Decode(e.to_string()));
                    }
                },
            }
        }

        if snapshot.uses_text() {
            if let Some(font_ref) = &snapshot.font_ref {
                match timeout(self.image_timeout, self.loader.fetch(font_ref)).await {
                    Err(_) => {
                        warn!("font '{font_ref}' timed out");
                        resolved.font_missing = Some(MissingReason::Timeout);
                    }
                    Ok(Err(e)) => {
                        warn!("font '{font_ref}' failed to load: {e}");
                        resolved.font_missing = Some(MissingReason::Load(e.to_string()));
                    }
                    Ok(Ok(bytes)) => {
                        resolved.set_font(snapshot.font_family.clone(), bytes);
                        if let Some(reason) = &resolved.font_missing {
                            warn!("font '{font_ref}' unusable: {reason}");
                        }
                    }
                }
            }
        }

        resolved
    }
}

// ============================================================================
// Tests
// ============================================================================
