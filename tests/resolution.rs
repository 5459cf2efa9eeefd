//! Resolution Integration Tests
//!
//! Tests for the exact, alias and fuzzy cascade against a JSON rules file.

mod common;

use warscribe::core::{EntityResolver, MatchMethod, ResolverSettings};
use warscribe::domain::{Confidence, DraftReport, EntityType, Player, ResolutionStatus, UnitMention};
use warscribe::store::AliasStore;

fn resolver(aliases: AliasStore) -> EntityResolver {
    EntityResolver::new(common::rules(), aliases, ResolverSettings::default())
}

fn draft(faction: &str, units: &[&str]) -> DraftReport {
    DraftReport {
        players: vec![Player {
            name: "Bob".to_string(),
            faction: faction.to_string(),
            detachment: None,
            confidence: Confidence::High,
        }],
        units: units
            .iter()
            .map(|name| UnitMention {
                name: name.to_string(),
                player_index: 0,
                points: None,
                confidence: Confidence::High,
            })
            .collect(),
        stratagems: Vec::new(),
        mission: None,
        points_limit: None,
    }
}

#[tokio::test]
async fn test_exact_match_carries_stats() {
    let resolver = resolver(AliasStore::in_memory().unwrap());

    let resolution = resolver
        .resolve_name("intercessors", EntityType::Unit, Some("Space Marines"))
        .await
        .unwrap();

    assert_eq!(resolution.method, MatchMethod::Exact);
    assert_eq!(resolution.score, 1.0);
    let entity = resolution.canonical.unwrap();
    assert_eq!(entity.name, "Intercessors");
    assert_eq!(entity.stats.unwrap().get("Sv").map(String::as_str), Some("3+"));
}

#[tokio::test]
async fn test_alias_hit_increments_usage() {
    let aliases = AliasStore::in_memory().unwrap();
    aliases
        .upsert_mapping("big mek", "Big Mek on Warbike", EntityType::Unit, Some("Orks"))
        .await
        .unwrap();
    let resolver = resolver(aliases.clone());

    let resolution = resolver
        .resolve_name("Big Mek", EntityType::Unit, Some("Orks"))
        .await
        .unwrap();

    assert_eq!(resolution.method, MatchMethod::Alias);
    assert_eq!(resolution.confidence, Confidence::High);
    assert_eq!(resolution.canonical.unwrap().name, "Big Mek on Warbike");

    let mappings = aliases.list_mappings().await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].usage_count, 1);
}

#[tokio::test]
async fn test_scoped_alias_does_not_leak_into_other_factions() {
    let aliases = AliasStore::in_memory().unwrap();
    aliases
        .upsert_mapping("big mek", "Big Mek on Warbike", EntityType::Unit, Some("Orks"))
        .await
        .unwrap();
    let resolver = resolver(aliases);

    let resolution = resolver
        .resolve_name("Big Mek", EntityType::Unit, Some("Space Marines"))
        .await
        .unwrap();

    assert_ne!(resolution.method, MatchMethod::Alias);
    assert!(!resolution.is_validated());
}

#[tokio::test]
async fn test_typo_gets_suggestion_without_feedback() {
    let resolver = resolver(AliasStore::in_memory().unwrap());

    let output = resolver
        .resolve_report("vid1", &draft("Space Marines", &["Intercesors"]), "")
        .await
        .unwrap();

    let unit = &output.report.units[0];
    assert_eq!(unit.confidence, Confidence::Medium);
    assert_eq!(unit.status, ResolutionStatus::Unvalidated);
    assert!(unit.canonical_name.is_none());
    let suggestion = unit.suggested_match.as_ref().unwrap();
    assert_eq!(suggestion.name, "Intercessors");
    assert!(suggestion.stats.is_some());
    assert!(output.feedback.is_empty());
}

#[tokio::test]
async fn test_partial_name_raises_feedback_with_ranked_suggestions() {
    let resolver = resolver(AliasStore::in_memory().unwrap());
    let transcript = "Bob moves the Big Mek up the left flank behind the Boyz";

    let output = resolver
        .resolve_report("vid1", &draft("Orks", &["Big Mek", "Boyz"]), transcript)
        .await
        .unwrap();

    let unit = &output.report.units[0];
    assert_eq!(unit.confidence, Confidence::Low);
    assert!(unit.suggested_match.is_none());
    assert_eq!(unit.faction_scope.as_deref(), Some("Orks"));

    assert_eq!(output.feedback.len(), 1);
    let item = &output.feedback[0];
    assert_eq!(unit.feedback_id.as_deref(), Some(item.id.as_str()));
    assert_eq!(item.raw_token, "Big Mek");
    assert_eq!(item.entity_type, EntityType::Unit);
    assert!(!item.suggestions.is_empty() && item.suggestions.len() <= 3);
    assert_eq!(item.suggestions[0].0, "Big Mek on Warbike");
    assert!(item.context.contains("Big Mek up the left"));
    assert_eq!(output.report.pending_feedback, vec![item.id.clone()]);

    assert_eq!(output.report.units[1].canonical_name.as_deref(), Some("Boyz"));
}

#[tokio::test]
async fn test_unresolved_faction_falls_back_to_global_scope() {
    let resolver = resolver(AliasStore::in_memory().unwrap());

    let output = resolver
        .resolve_report("vid1", &draft("Greenskins", &["Warboss"]), "")
        .await
        .unwrap();

    assert_eq!(output.report.players[0].faction, "Greenskins");
    let unit = &output.report.units[0];
    assert_eq!(unit.canonical_name.as_deref(), Some("Warboss"));
    assert!(unit.faction_scope.is_none());
    assert!(output
        .feedback
        .iter()
        .any(|item| item.entity_type == EntityType::Faction && item.raw_token == "Greenskins"));
}

#[tokio::test]
async fn test_resolution_is_deterministic_across_worker_limits() {
    let names = ["Boyz", "Big Mek", "Warboss", "Big Mek in Mega Armor", "Gretchin"];
    let mut reports = Vec::new();

    for worker_limit in [1, 5] {
        let settings = ResolverSettings {
            worker_limit,
            ..ResolverSettings::default()
        };
        let resolver = EntityResolver::new(common::rules(), AliasStore::in_memory().unwrap(), settings);
        let output = resolver
            .resolve_report("vid1", &draft("Orks", &names), "")
            .await
            .unwrap();
        reports.push((output.report.units, output.feedback.len()));
    }

    assert_eq!(reports[0], reports[1]);
    let names_out: Vec<&str> = reports[0].0.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names_out, names);
}

#[tokio::test]
async fn test_thresholds_are_configurable() {
    let settings = ResolverSettings {
        high_threshold: 0.6,
        medium_threshold: 0.3,
        ..ResolverSettings::default()
    };
    let resolver = EntityResolver::new(common::rules(), AliasStore::in_memory().unwrap(), settings);

    let resolution = resolver
        .resolve_name("Intercesors", EntityType::Unit, Some("Space Marines"))
        .await
        .unwrap();

    assert_eq!(resolution.method, MatchMethod::Fuzzy);
    assert_eq!(resolution.confidence, Confidence::High);
    assert_eq!(resolution.canonical.unwrap().name, "Intercessors");
}
