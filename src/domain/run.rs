//! Run state for a single pipeline execution.
//!
//! A run is identified by a fresh UUID and the video it processes. It holds
//! the stage artifacts collected so far, so a halted run still exposes the
//! partial results of the stages that completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

use super::artifact::{ResolutionOutput, StageArtifact, StageKind, StageOutput};
use super::report::BattleReport;

/// A pipeline execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Video being processed
    pub video_id: String,

    /// Current state of the run
    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Stage artifacts in execution order
    pub artifacts: Vec<StageArtifact>,

    /// True when the report was served from the cache without running stages
    #[serde(default)]
    pub from_cache: bool,

    /// Cached report (only set when `from_cache`)
    #[serde(default)]
    cached_report: Option<BattleReport>,
}

impl PipelineRun {
    /// Create a new run for a video
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id: video_id.into(),
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            artifacts: Vec::new(),
            from_cache: false,
            cached_report: None,
        }
    }

    /// A completed run answered from the report cache
    pub fn cached(report: BattleReport) -> Self {
        let mut run = Self::new(report.video_id.clone());
        run.state = RunState::Completed;
        run.completed_at = Some(run.started_at);
        run.from_cache = true;
        run.cached_report = Some(report);
        run
    }

    /// Record a stage artifact, updating state if it failed
    pub fn record(&mut self, artifact: StageArtifact) {
        if let Some(error) = artifact.error() {
            self.state = RunState::Failed {
                stage: artifact.stage,
                error: error.clone(),
            };
            self.completed_at = Some(Utc::now());
        }
        self.artifacts.push(artifact);
    }

    /// Mark the run completed
    pub fn complete(&mut self) {
        self.state = RunState::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }

    /// The failure that halted the run, if any
    pub fn failure(&self) -> Option<(StageKind, &PipelineError)> {
        match &self.state {
            RunState::Failed { stage, error } => Some((*stage, error)),
            _ => None,
        }
    }

    /// Artifact for a stage, if that stage ran
    pub fn artifact(&self, stage: StageKind) -> Option<&StageArtifact> {
        self.artifacts.iter().find(|a| a.stage == stage)
    }

    /// Stages that completed, in order
    pub fn completed_stages(&self) -> Vec<StageKind> {
        self.artifacts
            .iter()
            .filter(|a| a.is_completed())
            .map(|a| a.stage)
            .collect()
    }

    /// Output of the resolution stage
    pub fn resolution(&self) -> Option<&ResolutionOutput> {
        match self.artifact(StageKind::Resolution)?.output()? {
            StageOutput::Resolved(output) => Some(output),
            _ => None,
        }
    }

    /// The finished report, from the cache or the resolution stage
    pub fn report(&self) -> Option<&BattleReport> {
        self.cached_report
            .as_ref()
            .or_else(|| self.resolution().map(|r| &r.report))
    }

    /// Collapse into the report or the error that halted the run
    pub fn into_result(self) -> Result<BattleReport, PipelineError> {
        if let Some((_, error)) = self.failure() {
            return Err(error.clone());
        }
        if let Some(report) = self.cached_report {
            return Ok(report);
        }
        self.artifacts
            .into_iter()
            .rev()
            .find_map(|a| match a.outcome {
                super::artifact::StageOutcome::Completed {
                    output: StageOutput::Resolved(output),
                } => Some(output.report),
                _ => None,
            })
            .ok_or_else(|| PipelineError::Incomplete {
                video_id: self.video_id.clone(),
            })
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    Running,

    /// All stages completed
    Completed,

    /// Halted by a stage failure
    Failed {
        stage: StageKind,
        error: PipelineError,
    },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}
