//! Core pipeline logic.
//!
//! This module contains:
//! - Similarity: Normalization and fuzzy scoring
//! - Resolver: The exact, alias, fuzzy resolution cascade
//! - Extraction: Schema-constrained extraction with one repair attempt
//! - Stages: Preprocess, detect, extract, resolve
//! - Orchestrator: Ordered stage execution with per-stage artifacts

pub mod extraction;
pub mod orchestrator;
pub mod resolver;
pub mod similarity;
pub mod stages;

// Re-export commonly used types
pub use extraction::{output_schema, validate_extraction, ExtractionInvoker, SchemaViolation};
pub use orchestrator::Orchestrator;
pub use resolver::{EntityResolver, MatchMethod, NameResolution, ResolverSettings};
pub use similarity::{normalize, similarity};
pub use stages::{hash_input, DetectStage, ExtractStage, PreprocessStage, ResolveStage, Stage};
