//! Error types for the export engine.

use std::time::Duration;

use thiserror::Error;

use crate::strategy::StrategyKind;

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The failure recorded for a single strategy attempt.
///
/// The coordinator collects one of these per attempted strategy and
/// aggregates them into [`Error::AllStrategiesExhausted`] when the
/// fallback chain runs dry.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyFailure {
    /// Which strategy failed.
    pub strategy: StrategyKind,
    /// Human-readable reason, suitable for diagnostics/telemetry.
    pub reason: String,
}

impl std::fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

fn join_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while rendering or exporting a card.
///
/// Per-strategy errors (`ResourceTaint`, `Render`, `AspectMismatch`,
/// `EmptyContent`) are caught by the coordinator and translated into a
/// retry with the next strategy; only [`Error::AllStrategiesExhausted`]
/// and [`Error::Cancelled`] propagate to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// A resource load exceeded its per-resource timeout.
    ///
    /// Non-fatal inside the readiness gate (the resource is flagged
    /// missing and rendering degrades to a placeholder); surfaced as an
    /// error only by loaders used outside the gate.
    #[error("resource '{resource}' timed out after {after:?}")]
    ResourceTimeout { resource: String, after: Duration },

    /// A live-preview capture could not be read back.
    #[error("preview capture could not be read back: {0}")]
    ResourceTaint(String),

    /// A strategy failed to produce a buffer.
    #[error("rendering failed: {0}")]
    Render(String),

    /// A verified buffer could not be serialized to the requested format.
    #[error("encoding failed: {0}")]
    EncodeFailure(String),

    /// Verifier rejection: buffer dimensions drifted from the canonical
    /// canvas aspect ratio.
    #[error("aspect ratio mismatch: {width}x{height} is not within tolerance of the canvas ratio")]
    AspectMismatch { width: u32, height: u32 },

    /// Verifier rejection: too few pixels differ from the background.
    #[error("buffer content below threshold (fraction {fraction:.5})")]
    EmptyContent { fraction: f32 },

    /// Terminal failure: every strategy in the chain was attempted.
    #[error("all rendering strategies failed: {}", join_failures(.0))]
    AllStrategiesExhausted(Vec<StrategyFailure>),

    /// The export was cancelled before rendering began.
    #[error("export cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_error_lists_every_strategy() {
        let err = Error::AllStrategiesExhausted(vec![
            StrategyFailure {
                strategy: StrategyKind::DirectDraw,
                reason: "boom".into(),
            },
            StrategyFailure {
                strategy: StrategyKind::Vector,
                reason: "bust".into(),
            },
        ]);

        let msg = err.to_string();
        assert!(msg.contains("direct-draw: boom"), "got: {msg}");
        assert!(msg.contains("vector: bust"), "got: {msg}");
    }

    #[test]
    fn strategy_failure_display() {
        let failure = StrategyFailure {
            strategy: StrategyKind::Snapshot,
            reason: "capture tainted".into(),
        };
        assert_eq!(failure.to_string(), "snapshot: capture tainted");
    }
}
