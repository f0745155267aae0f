//! Pipeline error types

use crate::kafka::{PartitionRef, StreamError};
use crate::pipeline::enrich::EnrichError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that stop the pipeline.
///
/// Recoverable conditions (end of partition, a single offset reset, a bad
/// timestamp) are handled inside the runner and never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cannot process record at {partition}@{offset}: {source}")]
    Decode {
        partition: PartitionRef,
        offset: i64,
        #[source]
        source: EnrichError,
    },

    #[error("Input stream error: {0}")]
    Input(StreamError),

    #[error("Failed to publish to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: StreamError,
    },

    #[error("Failed to reset offsets: {0}")]
    OffsetReset(StreamError),

    #[error("Offset still out of range after {0} consecutive resets")]
    OffsetResetExhausted(u32),

    #[error("Pipeline already stopped")]
    AlreadyStopped,
}

impl PipelineError {
    /// Short label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode { .. } => "decode",
            PipelineError::Input(_) => "input",
            PipelineError::Publish { .. } => "publish",
            PipelineError::OffsetReset(_) => "offset_reset",
            PipelineError::OffsetResetExhausted(_) => "offset_reset_exhausted",
            PipelineError::AlreadyStopped => "already_stopped",
        }
    }
}
