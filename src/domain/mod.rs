//! Domain types for the battle report pipeline.
//!
//! This module contains the core data structures:
//! - Video: Acquired transcript data
//! - Report: Mentions, resolved entities and the finished battle report
//! - Feedback: Low-confidence items and user-taught aliases
//! - Rules: Canonical entities from the rules database
//! - Artifact: Per-stage outputs forming a run's audit trail
//! - Run: Pipeline execution state

pub mod artifact;
pub mod feedback;
pub mod report;
pub mod rules;
pub mod run;
pub mod video;

// Re-export commonly used types
pub use artifact::{
    Chapter, CleanedTranscript, Detection, Extraction, ResolutionOutput, StageArtifact, StageKind,
    StageOutcome, StageOutput,
};
pub use feedback::{EntityType, FeedbackItem, FeedbackStatus, UserMapping};
pub use report::{
    Acceptance, BattleReport, Confidence, DraftReport, Player, ReportSlot, ResolutionStatus,
    ResolvedStratagem, ResolvedUnit, SlotError, StratagemMention, SuggestedMatch, UnitMention,
    UnitStats,
};
pub use rules::CanonicalEntity;
pub use run::{PipelineRun, RunState};
pub use video::{PlayerMetadata, VideoData};
