//! Error taxonomy for the pipeline and the report service.
//!
//! `PipelineError` is recorded inside stage artifacts, so it is cloneable and
//! serializable and carries messages rather than source errors. Ambiguous
//! resolution is not an error: it is a low-confidence entry plus a feedback
//! item.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EntityType, SlotError};
use crate::store::StoreError;

/// Failures that halt a pipeline run
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PipelineError {
    /// Upstream transcript unavailable. No partial report.
    #[error("Transcript unavailable for '{video_id}': {reason}")]
    Acquisition { video_id: String, reason: String },

    /// Generative output failed validation after the repair attempt
    #[error("Extraction output failed schema validation after {attempts} attempts: {message}")]
    ExtractionSchema { message: String, attempts: u32 },

    /// Network, timeout or rate limit. Not retried here.
    #[error("Extraction transport failure: {message}")]
    ExtractionTransport { message: String },

    #[error("Transcript too large: {actual} > {limit} bytes")]
    InputTooLarge { actual: u64, limit: u64 },

    #[error("Rules database lookup failed: {message}")]
    Rules { message: String },

    #[error("Store failure: {message}")]
    Store { message: String },

    #[error("Stage '{stage}' received unexpected input '{found}'")]
    UnexpectedInput { stage: String, found: String },

    #[error("Run for '{video_id}' finished without a report")]
    Incomplete { video_id: String },
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Store {
            message: e.to_string(),
        }
    }
}

/// Failures surfaced by the report service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("No cached report for video '{0}'")]
    ReportNotFound(String),

    #[error("'{name}' is not a known {entity_type}")]
    UnknownCanonical { name: String, entity_type: EntityType },
}
