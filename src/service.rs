//! Report service.
//!
//! Owns the stores and the orchestrator and exposes the user-facing
//! operations: running the pipeline, accepting suggestions, resolving or
//! ignoring feedback, teaching aliases and clearing the cache. The same
//! operations are reachable through the closed `Request`/`Response` pair.
//!
//! Stores are written only after a run completes, so abandoning a run at
//! any stage boundary leaves them untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{GenerativeExtractor, RulesDatabase, TranscriptSource};
use crate::core::{EntityResolver, ExtractionInvoker, Orchestrator, ResolverSettings};
use crate::domain::feedback::feedback_id as feedback_key;
use crate::domain::{
    BattleReport, CanonicalEntity, EntityType, FeedbackItem, FeedbackStatus, PipelineRun,
    ReportSlot, StageArtifact, StageKind, UserMapping,
};
use crate::error::{PipelineError, ServiceError};
use crate::store::{AliasStore, ExtractionCache, StoreError};

/// Settings for the pipeline a service runs
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub resolution: ResolverSettings,
    pub max_transcript_bytes: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            resolution: ResolverSettings::default(),
            max_transcript_bytes: 2_097_152,
        }
    }
}

/// Front door to the pipeline and the stores
pub struct ReportService {
    source: Arc<dyn TranscriptSource>,
    rules: Arc<dyn RulesDatabase>,
    aliases: AliasStore,
    cache: ExtractionCache,
    orchestrator: Orchestrator,
}

impl ReportService {
    pub fn new(
        source: Arc<dyn TranscriptSource>,
        rules: Arc<dyn RulesDatabase>,
        extractor: Arc<dyn GenerativeExtractor>,
        aliases: AliasStore,
        cache: ExtractionCache,
        settings: PipelineSettings,
    ) -> Self {
        let resolver = EntityResolver::new(Arc::clone(&rules), aliases.clone(), settings.resolution);
        let orchestrator = Orchestrator::standard(
            settings.max_transcript_bytes,
            Arc::clone(&rules),
            ExtractionInvoker::new(extractor),
            resolver,
        );

        Self {
            source,
            rules,
            aliases,
            cache,
            orchestrator,
        }
    }

    pub fn aliases(&self) -> &AliasStore {
        &self.aliases
    }

    pub fn cache(&self) -> &ExtractionCache {
        &self.cache
    }

    /// Produce the report for a video.
    ///
    /// A cached report is returned without running any stage unless
    /// `force_refresh` is set. A run halted by a stage failure is returned as
    /// `Ok` with its artifacts; only acquisition and store failures are `Err`.
    #[instrument(skip(self))]
    pub async fn run_pipeline(&self, video_id: &str, force_refresh: bool) -> Result<PipelineRun, ServiceError> {
        if !force_refresh {
            if let Some(report) = self.cache.get_report(video_id).await? {
                info!("Serving cached report");
                return Ok(PipelineRun::cached(report));
            }
        }

        let cached_video = if force_refresh {
            None
        } else {
            self.cache.get_video(video_id).await?
        };
        let video = match cached_video {
            Some(video) => {
                debug!("Using cached transcript");
                video
            }
            None => {
                let video = self.source.fetch(video_id).await?;
                self.cache.put_video(&video).await?;
                video
            }
        };

        let run = self.orchestrator.run(video).await;

        if run.is_completed() {
            if let Some(output) = run.resolution() {
                let mut created = 0;
                for item in &output.feedback {
                    if self.aliases.create_feedback(item).await? {
                        created += 1;
                    }
                }
                self.cache.put_report(&output.report).await?;
                info!(
                    run_id = %run.id,
                    feedback_created = created,
                    needs_review = output.report.needs_review().len(),
                    "Report stored"
                );
            }
        } else if let Some((stage, error)) = run.failure() {
            warn!(run_id = %run.id, %stage, %error, "Run halted");
        }

        Ok(run)
    }

    /// The cached report for a video
    pub async fn report(&self, video_id: &str) -> Result<BattleReport, ServiceError> {
        self.cache
            .get_report(video_id)
            .await?
            .ok_or_else(|| ServiceError::ReportNotFound(video_id.to_string()))
    }

    /// Accept the suggestion on a unit. A validated unit is left unchanged.
    pub async fn accept_suggestion(&self, video_id: &str, unit_index: usize) -> Result<BattleReport, ServiceError> {
        self.accept(video_id, ReportSlot::Unit(unit_index)).await
    }

    /// Accept the suggestion on a stratagem
    pub async fn accept_stratagem_suggestion(
        &self,
        video_id: &str,
        stratagem_index: usize,
    ) -> Result<BattleReport, ServiceError> {
        self.accept(video_id, ReportSlot::Stratagem(stratagem_index)).await
    }

    #[instrument(skip(self))]
    async fn accept(&self, video_id: &str, slot: ReportSlot) -> Result<BattleReport, ServiceError> {
        let mut report = self.report(video_id).await?;

        let Some(acceptance) = report.accept_suggestion(slot)? else {
            debug!(?slot, "Already validated");
            return Ok(report);
        };

        self.aliases
            .upsert_mapping(
                &acceptance.raw_name,
                &acceptance.canonical_name,
                acceptance.entity_type,
                acceptance.faction_scope.as_deref(),
            )
            .await?;

        let id = acceptance.feedback_id.clone().unwrap_or_else(|| {
            feedback_key(
                video_id,
                acceptance.entity_type,
                &acceptance.raw_name,
                acceptance.faction_scope.as_deref(),
            )
        });
        if let Some(item) = self.aliases.get_feedback(&id).await? {
            if item.status == FeedbackStatus::Pending {
                self.aliases.resolve_feedback(&id, &acceptance.canonical_name).await?;
            }
        }

        self.cache.put_report(&report).await?;
        info!(
            raw = %acceptance.raw_name,
            canonical = %acceptance.canonical_name,
            "Suggestion accepted"
        );

        Ok(report)
    }

    /// Find a canonical entity, preferring the given faction scope
    async fn canonical(
        &self,
        entity_type: EntityType,
        name: &str,
        faction_scope: Option<&str>,
    ) -> Result<CanonicalEntity, ServiceError> {
        if let Some(entity) = self.rules.find(entity_type, name, faction_scope).await? {
            return Ok(entity);
        }
        if faction_scope.is_some() {
            if let Some(entity) = self.rules.find(entity_type, name, None).await? {
                return Ok(entity);
            }
        }
        Err(ServiceError::UnknownCanonical {
            name: name.to_string(),
            entity_type,
        })
    }

    /// Resolve a pending feedback item to a canonical name.
    ///
    /// Teaches the alias for the item's token and scope, and updates the
    /// cached report that raised it.
    #[instrument(skip(self))]
    pub async fn submit_feedback(&self, feedback_id: &str, resolved_to: &str) -> Result<FeedbackItem, ServiceError> {
        let item = self
            .aliases
            .get_feedback(feedback_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(feedback_id.to_string()))?;
        if item.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id: item.id,
                from: item.status,
            }
            .into());
        }

        let entity = self
            .canonical(item.entity_type, resolved_to, item.faction_scope.as_deref())
            .await?;

        let (resolved, _) = self.aliases.resolve_with_mapping(feedback_id, &entity.name).await?;

        if let Some(mut report) = self.cache.get_report(&item.video_id).await? {
            if report.apply_feedback(feedback_id, item.player_index, &entity) {
                self.cache.put_report(&report).await?;
            }
        }

        info!(raw = %item.raw_token, canonical = %entity.name, "Feedback resolved");
        Ok(resolved)
    }

    /// Close a pending feedback item without teaching anything
    #[instrument(skip(self))]
    pub async fn ignore_feedback(&self, feedback_id: &str) -> Result<FeedbackItem, ServiceError> {
        let item = self.aliases.ignore_feedback(feedback_id).await?;

        if let Some(mut report) = self.cache.get_report(&item.video_id).await? {
            if report.dismiss_feedback(feedback_id) {
                self.cache.put_report(&report).await?;
            }
        }

        Ok(item)
    }

    /// Teach an alias directly. The target must exist in the rules database.
    pub async fn teach_alias(
        &self,
        alias: &str,
        canonical_name: &str,
        entity_type: EntityType,
        faction_scope: Option<&str>,
    ) -> Result<UserMapping, ServiceError> {
        let entity = self.canonical(entity_type, canonical_name, faction_scope).await?;
        let mapping = self
            .aliases
            .upsert_mapping(alias, &entity.name, entity_type, faction_scope)
            .await?;
        info!(alias = %mapping.alias, canonical = %mapping.canonical_name, "Alias taught");
        Ok(mapping)
    }

    /// Pending feedback, optionally for one video
    pub async fn list_feedback(&self, video_id: Option<&str>) -> Result<Vec<FeedbackItem>, ServiceError> {
        Ok(self.aliases.list_pending(video_id).await?)
    }

    pub async fn list_mappings(&self) -> Result<Vec<UserMapping>, ServiceError> {
        Ok(self.aliases.list_mappings().await?)
    }

    /// Drop cached data for one video, or everything
    pub async fn clear_cache(&self, video_id: Option<&str>) -> Result<usize, ServiceError> {
        let removed = self.cache.invalidate(video_id).await?;
        info!(?video_id, removed, "Cache cleared");
        Ok(removed)
    }

    /// Dispatch a request. Failures become `Response::Error`.
    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => Response::Error { message: e.to_string() },
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response, ServiceError> {
        let response = match request {
            Request::RunPipeline {
                video_id,
                force_refresh,
            } => {
                let run = self.run_pipeline(&video_id, force_refresh).await?;
                let failure = run.failure().map(|(stage, error)| (stage, error.clone()));
                match failure {
                    Some((stage, error)) => Response::RunFailed {
                        stage,
                        error,
                        artifacts: run.artifacts,
                    },
                    None => Response::from_report(run.into_result()?),
                }
            }
            Request::GetReport { video_id } => Response::from_report(self.report(&video_id).await?),
            Request::AcceptSuggestion { video_id, slot } => {
                Response::from_report(self.accept(&video_id, slot).await?)
            }
            Request::SubmitFeedback {
                feedback_id,
                resolved_to,
            } => Response::Feedback {
                item: self.submit_feedback(&feedback_id, &resolved_to).await?,
            },
            Request::IgnoreFeedback { feedback_id } => Response::Feedback {
                item: self.ignore_feedback(&feedback_id).await?,
            },
            Request::TeachAlias {
                alias,
                canonical_name,
                entity_type,
                faction_scope,
            } => Response::Mapping {
                mapping: self
                    .teach_alias(&alias, &canonical_name, entity_type, faction_scope.as_deref())
                    .await?,
            },
            Request::ListFeedback { video_id } => Response::FeedbackList {
                items: self.list_feedback(video_id.as_deref()).await?,
            },
            Request::ListMappings => Response::Mappings {
                mappings: self.list_mappings().await?,
            },
            Request::ClearCache { video_id } => Response::CacheCleared {
                removed: self.clear_cache(video_id.as_deref()).await?,
            },
        };
        Ok(response)
    }
}

/// Messages accepted by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Request {
    RunPipeline {
        video_id: String,
        #[serde(default)]
        force_refresh: bool,
    },
    GetReport {
        video_id: String,
    },
    AcceptSuggestion {
        video_id: String,
        slot: ReportSlot,
    },
    SubmitFeedback {
        feedback_id: String,
        resolved_to: String,
    },
    IgnoreFeedback {
        feedback_id: String,
    },
    TeachAlias {
        alias: String,
        canonical_name: String,
        entity_type: EntityType,
        #[serde(default)]
        faction_scope: Option<String>,
    },
    ListFeedback {
        #[serde(default)]
        video_id: Option<String>,
    },
    ListMappings,
    ClearCache {
        #[serde(default)]
        video_id: Option<String>,
    },
}

/// Replies produced by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Response {
    Report {
        report: BattleReport,
        needs_review: Vec<ReportSlot>,
    },
    RunFailed {
        stage: StageKind,
        error: PipelineError,
        artifacts: Vec<StageArtifact>,
    },
    Feedback {
        item: FeedbackItem,
    },
    FeedbackList {
        items: Vec<FeedbackItem>,
    },
    Mapping {
        mapping: UserMapping,
    },
    Mappings {
        mappings: Vec<UserMapping>,
    },
    CacheCleared {
        removed: usize,
    },
    Error {
        message: String,
    },
}

impl Response {
    fn from_report(report: BattleReport) -> Self {
        let needs_review = report.needs_review();
        Response::Report { report, needs_review }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request: Request = serde_json::from_value(json!({
            "type": "accept_suggestion",
            "video_id": "vid1",
            "slot": { "kind": "unit", "index": 2 }
        }))
        .unwrap();

        assert_eq!(
            request,
            Request::AcceptSuggestion {
                video_id: "vid1".to_string(),
                slot: ReportSlot::Unit(2),
            }
        );

        let run: Request = serde_json::from_value(json!({ "type": "run_pipeline", "video_id": "vid1" })).unwrap();
        assert_eq!(
            run,
            Request::RunPipeline {
                video_id: "vid1".to_string(),
                force_refresh: false,
            }
        );
    }

    #[test]
    fn test_error_response_wire_format() {
        let response = Response::Error {
            message: "No cached report for video 'vid1'".to_string(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "error");
    }
}
