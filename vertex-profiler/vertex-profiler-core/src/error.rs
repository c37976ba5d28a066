//! Profiler error type.

use thiserror::Error;

use crate::Mode;

pub type ProfilerResult<T> = Result<T, ProfilerError>;

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("invalid config `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("failed to read profiler config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("threshold table needs at least 2 entries, got {0}")]
    ThresholdTableTooShort(usize),

    #[error("frame size must be > 0, got {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },

    #[error("{mode:?} pipeline failed validation: {message}")]
    PipelineValidation { mode: Mode, message: String },

    #[error("pooled resource `{0}` requested before it was allocated")]
    MissingResource(&'static str),

    #[error("readback of `{label}` failed: {reason}")]
    Readback { label: &'static str, reason: String },
}
