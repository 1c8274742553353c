// THEORY:
// Every stage of the heatmap pipeline reports failure through one error type.
// A render either produces a complete overlay or one of these variants; there is
// no partial output. None of the variants are retryable inside the library:
// the pipeline is deterministic, so the same inputs fail the same way.

use thiserror::Error;

/// Errors surfaced by the heatmap pipeline.
#[derive(Debug, Error)]
pub enum HeatmapError {
    /// The detection document does not match the documented schema.
    #[error("invalid detection document: {message}")]
    Validation { message: String },

    /// Detections or buffers disagree with the image size.
    #[error("dimension mismatch: {message}")]
    DimensionMismatch { message: String },

    /// The pixel buffer is not 8-bit, 3-channel RGB.
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid render configuration: {0}")]
    InvalidConfig(String),

    /// A background worker panicked or was cancelled.
    #[error("render worker failed: {0}")]
    Worker(String),
}

impl HeatmapError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        HeatmapError::Validation { message: message.into() }
    }

    pub(crate) fn dimension_mismatch(message: impl Into<String>) -> Self {
        HeatmapError::DimensionMismatch { message: message.into() }
    }
}

impl From<serde_json::Error> for HeatmapError {
    fn from(err: serde_json::Error) -> Self {
        HeatmapError::validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HeatmapError>;
