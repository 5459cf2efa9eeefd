//! Artifacts produced by pipeline stages.
//!
//! Each stage consumes the previous stage's output and produces a new one.
//! The ordered list of artifacts is the audit trail for a run, including the
//! typed failure of the stage that halted it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

use super::feedback::FeedbackItem;
use super::report::{BattleReport, DraftReport};
use super::video::{PlayerMetadata, VideoData};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preprocessing,
    Detection,
    Extraction,
    Resolution,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Preprocessing => "preprocessing",
            StageKind::Detection => "detection",
            StageKind::Extraction => "extraction",
            StageKind::Resolution => "resolution",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transcript after noise removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedTranscript {
    pub video_id: String,

    /// Paragraphs separated by a blank line
    pub text: String,

    /// First 16 hex chars of SHA256 over the raw transcript
    pub content_hash: String,

    /// Caption tags and timestamps removed
    pub removed_noise: usize,

    #[serde(default)]
    pub player_hints: Vec<PlayerMetadata>,
}

/// A contiguous section of the cleaned transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub index: usize,

    /// Byte range into the cleaned text
    pub start: usize,
    pub end: usize,

    /// Phase heading, when the section opens with one ("Deployment", "Turn 2")
    pub heading: Option<String>,
}

/// Chapter and player boundaries found in a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub transcript: CleanedTranscript,
    pub chapters: Vec<Chapter>,

    /// Canonical faction names, in order of first mention
    pub factions: Vec<String>,

    pub player_names: Vec<String>,
}

/// Draft report produced by structured extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub detection: Detection,
    pub draft: DraftReport,

    /// Invocations used (2 when a repair was needed)
    pub attempts: u32,
}

/// Resolved report plus the feedback it raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutput {
    pub report: BattleReport,
    pub feedback: Vec<FeedbackItem>,
}

/// Output of a stage. `Source` seeds the first stage and is never recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum StageOutput {
    Source(VideoData),
    Preprocessed(CleanedTranscript),
    Detected(Detection),
    Extracted(Extraction),
    Resolved(ResolutionOutput),
}

impl StageOutput {
    /// Variant name, for diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            StageOutput::Source(_) => "source",
            StageOutput::Preprocessed(_) => "preprocessed",
            StageOutput::Detected(_) => "detected",
            StageOutput::Extracted(_) => "extracted",
            StageOutput::Resolved(_) => "resolved",
        }
    }

    /// Short human-readable notes on the output
    pub fn notes(&self) -> Vec<String> {
        match self {
            StageOutput::Source(video) => vec![format!("{} bytes raw", video.text.len())],
            StageOutput::Preprocessed(t) => vec![
                format!("{} bytes cleaned", t.text.len()),
                format!("{} noise tokens removed", t.removed_noise),
                format!("hash {}", t.content_hash),
            ],
            StageOutput::Detected(d) => vec![
                format!("{} chapters", d.chapters.len()),
                format!("factions: {}", d.factions.join(", ")),
            ],
            StageOutput::Extracted(e) => vec![
                format!("{} players", e.draft.players.len()),
                format!("{} units", e.draft.units.len()),
                format!("{} stratagems", e.draft.stratagems.len()),
                format!("{} attempts", e.attempts),
            ],
            StageOutput::Resolved(r) => vec![
                format!("{} entries need review", r.report.needs_review().len()),
                format!("{} feedback items", r.feedback.len()),
            ],
        }
    }
}

/// Result of one stage execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageOutcome {
    Completed { output: StageOutput },
    Failed { error: PipelineError },
}

/// One entry in a run's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageArtifact {
    pub stage: StageKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl StageArtifact {
    pub fn completed(stage: StageKind, started_at: DateTime<Utc>, duration_ms: u64, output: StageOutput) -> Self {
        let notes = output.notes();
        Self {
            stage,
            started_at,
            duration_ms,
            outcome: StageOutcome::Completed { output },
            notes,
        }
    }

    pub fn failed(stage: StageKind, started_at: DateTime<Utc>, duration_ms: u64, error: PipelineError) -> Self {
        Self {
            stage,
            started_at,
            duration_ms,
            notes: vec![error.to_string()],
            outcome: StageOutcome::Failed { error },
        }
    }

    pub fn output(&self) -> Option<&StageOutput> {
        match &self.outcome {
            StageOutcome::Completed { output } => Some(output),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            StageOutcome::Completed { .. } => None,
            StageOutcome::Failed { error } => Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, StageOutcome::Completed { .. })
    }
}
