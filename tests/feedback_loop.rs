//! Feedback Loop Integration Tests
//!
//! Tests that user decisions (resolved feedback, accepted suggestions,
//! taught aliases) change how later runs resolve the same mentions.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{reply_with_units, video, MemoryTranscripts, ScriptedExtractor};
use warscribe::domain::{Confidence, EntityType, FeedbackStatus, ReportSlot, ResolutionStatus};
use warscribe::error::ServiceError;
use warscribe::service::{Request, Response};
use warscribe::store::StoreError;

fn two_videos() -> Arc<MemoryTranscripts> {
    Arc::new(
        MemoryTranscripts::default()
            .with_video(video("vid1"))
            .with_video(video("vid2")),
    )
}

#[tokio::test]
async fn test_resolved_feedback_teaches_alias_for_next_video() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1), ("Boyz", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);

    let first = service.run_pipeline("vid1", false).await.unwrap().into_result().unwrap();
    assert_eq!(first.units[0].confidence, Confidence::Low);

    let pending = service.list_feedback(Some("vid1")).await.unwrap();
    assert_eq!(pending.len(), 1);
    let item = &pending[0];
    assert_eq!(item.raw_token, "Big Mek");
    assert_eq!(item.faction_scope.as_deref(), Some("Orks"));
    assert_eq!(item.top_suggestion(), Some("Big Mek on Warbike"));

    let resolved = service
        .submit_feedback(&item.id, "big mek on warbike")
        .await
        .unwrap();
    assert_eq!(resolved.status, FeedbackStatus::Resolved);
    assert_eq!(resolved.resolved_to.as_deref(), Some("Big Mek on Warbike"));
    assert!(resolved.resolved_at.is_some());

    let mappings = service.list_mappings().await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].canonical_name, "Big Mek on Warbike");
    assert_eq!(mappings[0].entity_type, EntityType::Unit);
    assert_eq!(mappings[0].faction_scope.as_deref(), Some("Orks"));

    // The cached report that raised the item picks up the decision
    let updated = service.report("vid1").await.unwrap();
    assert_eq!(updated.units[0].canonical_name.as_deref(), Some("Big Mek on Warbike"));
    assert!(updated.pending_feedback.is_empty());

    let second = service.run_pipeline("vid2", false).await.unwrap().into_result().unwrap();
    assert_eq!(second.units[0].status, ResolutionStatus::Validated);
    assert_eq!(second.units[0].confidence, Confidence::High);
    assert_eq!(second.units[0].canonical_name.as_deref(), Some("Big Mek on Warbike"));
    assert!(service.list_feedback(Some("vid2")).await.unwrap().is_empty());

    let mappings = service.list_mappings().await.unwrap();
    assert_eq!(mappings[0].usage_count, 1);
}

#[tokio::test]
async fn test_resolving_closed_feedback_fails() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);
    service.run_pipeline("vid1", false).await.unwrap();

    let item = service.list_feedback(None).await.unwrap().remove(0);
    service.ignore_feedback(&item.id).await.unwrap();

    let err = service
        .submit_feedback(&item.id, "Big Mek on Warbike")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Store(StoreError::InvalidTransition {
            from: FeedbackStatus::Ignored,
            ..
        })
    ));

    let err = service.submit_feedback("fb-0000000000000000", "Boyz").await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_resolving_to_unknown_name_is_rejected() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);
    service.run_pipeline("vid1", false).await.unwrap();

    let item = service.list_feedback(None).await.unwrap().remove(0);
    let err = service.submit_feedback(&item.id, "Gorkanaut").await.unwrap_err();

    assert!(matches!(err, ServiceError::UnknownCanonical { .. }));
    let still_pending = service.list_feedback(None).await.unwrap();
    assert_eq!(still_pending.len(), 1);
    assert!(service.list_mappings().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ignored_feedback_is_not_raised_again() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);
    service.run_pipeline("vid1", false).await.unwrap();

    let item = service.list_feedback(None).await.unwrap().remove(0);
    let ignored = service.ignore_feedback(&item.id).await.unwrap();
    assert_eq!(ignored.status, FeedbackStatus::Ignored);

    let rerun = service.run_pipeline("vid1", true).await.unwrap().into_result().unwrap();

    assert!(rerun.pending_feedback.is_empty());
    assert!(rerun.units[0].feedback_id.is_none());
    assert_eq!(rerun.units[0].status, ResolutionStatus::Unvalidated);
    assert!(service.list_feedback(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_pending_feedback() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);

    service.run_pipeline("vid1", false).await.unwrap();
    service.run_pipeline("vid1", true).await.unwrap();

    assert_eq!(service.list_feedback(Some("vid1")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_accept_suggestion_is_idempotent() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Intercesors", 0)]));
    let service = common::in_memory_service(two_videos(), extractor);

    let report = service.run_pipeline("vid1", false).await.unwrap().into_result().unwrap();
    assert_eq!(report.needs_review(), vec![ReportSlot::Unit(0)]);

    let accepted = service.accept_suggestion("vid1", 0).await.unwrap();
    let unit = &accepted.units[0];
    assert_eq!(unit.status, ResolutionStatus::Validated);
    assert_eq!(unit.canonical_name.as_deref(), Some("Intercessors"));
    assert_eq!(unit.stats.as_ref().and_then(|s| s.get("T")).map(String::as_str), Some("4"));
    assert!(unit.suggested_match.is_none());

    let again = service.accept_suggestion("vid1", 0).await.unwrap();
    assert_eq!(again, accepted);
    assert_eq!(service.report("vid1").await.unwrap(), accepted);

    let mappings = service.list_mappings().await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].alias, "Intercesors");
    assert_eq!(mappings[0].faction_scope.as_deref(), Some("Space Marines"));

    // The learned alias validates the same typo in the next video
    let next = service.run_pipeline("vid2", false).await.unwrap().into_result().unwrap();
    assert_eq!(next.units[0].canonical_name.as_deref(), Some("Intercessors"));
    assert_eq!(next.units[0].match_score, 1.0);
}

#[tokio::test]
async fn test_accept_rejects_bad_slots() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);
    service.run_pipeline("vid1", false).await.unwrap();

    let out_of_range = service.accept_suggestion("vid1", 7).await.unwrap_err();
    assert!(matches!(out_of_range, ServiceError::Slot(_)));

    // Low-confidence entries have no suggestion to accept
    let no_suggestion = service.accept_suggestion("vid1", 0).await.unwrap_err();
    assert!(matches!(no_suggestion, ServiceError::Slot(_)));

    let missing = service.accept_suggestion("vid9", 0).await.unwrap_err();
    assert!(matches!(missing, ServiceError::ReportNotFound(_)));
}

#[tokio::test]
async fn test_teach_alias_validates_canonical_name() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Dread", 0)]));
    let service = common::in_memory_service(two_videos(), extractor);

    let err = service
        .teach_alias("dread", "Ironclad Dreadnought", EntityType::Unit, Some("Space Marines"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnknownCanonical { .. }));

    let mapping = service
        .teach_alias("dread", "redemptor dreadnought", EntityType::Unit, Some("Space Marines"))
        .await
        .unwrap();
    assert_eq!(mapping.canonical_name, "Redemptor Dreadnought");

    let report = service.run_pipeline("vid1", false).await.unwrap().into_result().unwrap();
    assert_eq!(report.units[0].canonical_name.as_deref(), Some("Redemptor Dreadnought"));
}

#[tokio::test]
async fn test_requests_round_trip_through_handle() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Intercesors", 0)]));
    let service = common::in_memory_service(two_videos(), extractor);

    let response = service
        .handle(Request::RunPipeline {
            video_id: "vid1".to_string(),
            force_refresh: false,
        })
        .await;
    match response {
        Response::Report { needs_review, .. } => assert_eq!(needs_review, vec![ReportSlot::Unit(0)]),
        other => panic!("unexpected response: {:?}", other),
    }

    let response = service
        .handle(Request::AcceptSuggestion {
            video_id: "vid1".to_string(),
            slot: ReportSlot::Unit(0),
        })
        .await;
    match response {
        Response::Report { needs_review, .. } => assert!(needs_review.is_empty()),
        other => panic!("unexpected response: {:?}", other),
    }

    let response = service.handle(Request::ClearCache { video_id: None }).await;
    assert!(matches!(response, Response::CacheCleared { removed } if removed >= 1));

    let response = service
        .handle(Request::GetReport {
            video_id: "vid1".to_string(),
        })
        .await;
    match response {
        Response::Error { message } => assert!(message.contains("vid1")),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_faction_feedback_rewrites_player_and_scopes_next_video() {
    let mut reply = reply_with_units(&[("Boyz", 1)]);
    reply["players"][1]["faction"] = json!("Ork");
    let service = common::in_memory_service(two_videos(), ScriptedExtractor::always(reply));

    let first = service.run_pipeline("vid1", false).await.unwrap().into_result().unwrap();
    assert_eq!(first.players[1].faction, "Ork");
    assert!(first.units[0].faction_scope.is_none());

    let pending = service.list_feedback(Some("vid1")).await.unwrap();
    let item = pending
        .iter()
        .find(|item| item.entity_type == EntityType::Faction)
        .unwrap();
    assert_eq!(item.raw_token, "Ork");
    assert_eq!(item.player_index, Some(1));
    assert_eq!(item.top_suggestion(), Some("Orks"));

    service.submit_feedback(&item.id, "Orks").await.unwrap();

    let updated = service.report("vid1").await.unwrap();
    assert_eq!(updated.players[1].faction, "Orks");
    assert_eq!(updated.players[1].confidence, Confidence::High);
    assert!(!updated.pending_feedback.contains(&item.id));

    let second = service.run_pipeline("vid2", false).await.unwrap().into_result().unwrap();
    assert_eq!(second.players[1].faction, "Orks");
    assert_eq!(second.units[0].faction_scope.as_deref(), Some("Orks"));
    assert!(service.list_feedback(Some("vid2")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_detachment_feedback_is_scoped_to_faction() {
    let mut reply = reply_with_units(&[("Boyz", 1)]);
    reply["players"][1]["detachment"] = json!("Horde");
    let service = common::in_memory_service(two_videos(), ScriptedExtractor::always(reply));

    let first = service.run_pipeline("vid1", false).await.unwrap().into_result().unwrap();
    assert_eq!(first.players[1].faction, "Orks");
    assert_eq!(first.players[1].detachment.as_deref(), Some("Horde"));

    let pending = service.list_feedback(Some("vid1")).await.unwrap();
    assert_eq!(pending.len(), 1);
    let item = &pending[0];
    assert_eq!(item.entity_type, EntityType::Detachment);
    assert_eq!(item.raw_token, "Horde");
    assert_eq!(item.faction_scope.as_deref(), Some("Orks"));
    assert_eq!(item.top_suggestion(), Some("War Horde"));

    service.submit_feedback(&item.id, "War Horde").await.unwrap();

    let updated = service.report("vid1").await.unwrap();
    assert_eq!(updated.players[1].detachment.as_deref(), Some("War Horde"));
    assert!(updated.pending_feedback.is_empty());

    let mappings = service.list_mappings().await.unwrap();
    assert_eq!(mappings[0].entity_type, EntityType::Detachment);
    assert_eq!(mappings[0].faction_scope.as_deref(), Some("Orks"));

    let second = service.run_pipeline("vid2", false).await.unwrap().into_result().unwrap();
    assert_eq!(second.players[1].detachment.as_deref(), Some("War Horde"));
    assert!(service.list_feedback(Some("vid2")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_accept_stratagem_suggestion_teaches_alias() {
    let mut reply = reply_with_units(&[]);
    reply["stratagems"] = json!([
        { "name": "Armor of Contempt", "player_index": 0, "confidence": "high" }
    ]);
    let service = common::in_memory_service(two_videos(), ScriptedExtractor::always(reply));

    let report = service.run_pipeline("vid1", false).await.unwrap().into_result().unwrap();
    assert_eq!(report.stratagems[0].confidence, Confidence::Medium);
    assert_eq!(report.needs_review(), vec![ReportSlot::Stratagem(0)]);

    let accepted = service.accept_stratagem_suggestion("vid1", 0).await.unwrap();
    let strat = &accepted.stratagems[0];
    assert_eq!(strat.status, ResolutionStatus::Validated);
    assert_eq!(strat.canonical_name.as_deref(), Some("Armour of Contempt"));
    assert_eq!(strat.match_score, 1.0);
    assert!(accepted.needs_review().is_empty());

    let mappings = service.list_mappings().await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].entity_type, EntityType::Stratagem);
    assert_eq!(mappings[0].faction_scope.as_deref(), Some("Space Marines"));

    let next = service.run_pipeline("vid2", false).await.unwrap().into_result().unwrap();
    assert_eq!(next.stratagems[0].canonical_name.as_deref(), Some("Armour of Contempt"));
    assert_eq!(next.stratagems[0].status, ResolutionStatus::Validated);
}

#[tokio::test]
async fn test_ignore_clears_feedback_from_cached_report() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);
    service.run_pipeline("vid1", false).await.unwrap();

    let item = service.list_feedback(Some("vid1")).await.unwrap().remove(0);
    let before = service.report("vid1").await.unwrap();
    assert_eq!(before.units[0].feedback_id.as_deref(), Some(item.id.as_str()));
    assert_eq!(before.pending_feedback, vec![item.id.clone()]);

    service.ignore_feedback(&item.id).await.unwrap();

    let after = service.report("vid1").await.unwrap();
    assert!(after.units[0].feedback_id.is_none());
    assert!(after.pending_feedback.is_empty());
    assert_eq!(after.units[0].status, ResolutionStatus::Unvalidated);
    assert!(after.units[0].canonical_name.is_none());
}

#[tokio::test]
async fn test_spacing_variants_share_one_feedback_item() {
    let extractor = ScriptedExtractor::always(reply_with_units(&[("Big Mek", 1), ("Big  Mek", 1)]));
    let service = common::in_memory_service(two_videos(), extractor);

    let report = service.run_pipeline("vid1", false).await.unwrap().into_result().unwrap();
    let pending = service.list_feedback(Some("vid1")).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(report.units[0].feedback_id, report.units[1].feedback_id);

    service.submit_feedback(&pending[0].id, "Big Mek on Warbike").await.unwrap();

    let updated = service.report("vid1").await.unwrap();
    assert!(updated
        .units
        .iter()
        .all(|u| u.canonical_name.as_deref() == Some("Big Mek on Warbike")));
}
