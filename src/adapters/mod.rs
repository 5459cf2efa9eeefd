//! Interfaces to the external collaborators of the pipeline.
//!
//! The pipeline consumes three collaborators: a transcript source, a rules
//! database and a generative extractor. Each is an async trait so runs can
//! be driven by the reference adapters in this module or by test fakes.

pub mod http;
pub mod rules;
pub mod transcript;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{CanonicalEntity, EntityType, VideoData};
use crate::error::PipelineError;

pub use http::HttpExtractor;
pub use rules::JsonRulesDatabase;
pub use transcript::DirectoryTranscripts;

/// Result of one generative invocation that reached the model
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// Output parsed as JSON (not yet validated against the contract)
    Parsed(Value),

    /// Output could not be parsed as the requested structure
    SchemaViolation(String),
}

/// Network, timeout or rate-limit failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Supplies raw transcripts by video id
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Fetch the transcript for a video. Failures are `PipelineError::Acquisition`.
    async fn fetch(&self, video_id: &str) -> Result<VideoData, PipelineError>;
}

/// Authoritative catalogue of factions, detachments, units and stratagems
#[async_trait]
pub trait RulesDatabase: Send + Sync {
    /// All entities of a type visible in a faction scope.
    ///
    /// With a scope, returns the faction's own entities plus entities that
    /// belong to no faction. Without one, returns every entity of the type.
    async fn candidates(
        &self,
        entity_type: EntityType,
        faction: Option<&str>,
    ) -> Result<Vec<CanonicalEntity>, PipelineError>;

    /// Look up one entity by name or slug (case and punctuation insensitive)
    async fn find(
        &self,
        entity_type: EntityType,
        name: &str,
        faction: Option<&str>,
    ) -> Result<Option<CanonicalEntity>, PipelineError>;
}

/// Schema-constrained text generation
#[async_trait]
pub trait GenerativeExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Run a prompt against the model, asking for output matching `schema`
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<GenerationOutcome, TransportError>;
}
