//! Main orchestrator for pipeline execution.
//!
//! Runs the stages strictly in order, recording one artifact per stage.
//! A failing stage halts the run; artifacts from earlier stages stay on the
//! run so partial results can be inspected. Nothing is retried here.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, instrument};

use crate::adapters::RulesDatabase;
use crate::domain::{PipelineRun, StageArtifact, StageOutput, VideoData};

use super::extraction::ExtractionInvoker;
use super::resolver::EntityResolver;
use super::stages::{DetectStage, ExtractStage, PreprocessStage, ResolveStage, Stage};

/// Main pipeline orchestrator
pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
}

impl Orchestrator {
    /// Create an orchestrator over an explicit stage list
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The standard preprocess, detect, extract, resolve pipeline
    pub fn standard(
        max_transcript_bytes: u64,
        rules: Arc<dyn RulesDatabase>,
        invoker: ExtractionInvoker,
        resolver: EntityResolver,
    ) -> Self {
        Self::new(vec![
            Box::new(PreprocessStage::new(max_transcript_bytes)),
            Box::new(DetectStage::new(rules)),
            Box::new(ExtractStage::new(invoker)),
            Box::new(ResolveStage::new(resolver)),
        ])
    }

    /// Execute every stage against a video.
    ///
    /// Always returns the run; check `state` (or `into_result`) for failure.
    #[instrument(skip(self, video), fields(video_id = %video.video_id))]
    pub async fn run(&self, video: VideoData) -> PipelineRun {
        let mut run = PipelineRun::new(video.video_id.clone());
        info!(run_id = %run.id, stages = self.stages.len(), "Starting pipeline execution");

        let mut current = StageOutput::Source(video);

        for stage in &self.stages {
            let kind = stage.kind();
            let started_at = Utc::now();
            let clock = Instant::now();
            info!(run_id = %run.id, stage = %kind, "Stage started");

            match stage.run(current).await {
                Ok(output) => {
                    let duration_ms = clock.elapsed().as_millis() as u64;
                    info!(run_id = %run.id, stage = %kind, duration_ms, "Stage completed");
                    run.record(StageArtifact::completed(kind, started_at, duration_ms, output.clone()));
                    current = output;
                }
                Err(e) => {
                    let duration_ms = clock.elapsed().as_millis() as u64;
                    error!(run_id = %run.id, stage = %kind, duration_ms, error = %e, "Stage failed");
                    run.record(StageArtifact::failed(kind, started_at, duration_ms, e));
                    return run;
                }
            }
        }

        run.complete();
        info!(run_id = %run.id, "Run completed successfully");
        run
    }
}
