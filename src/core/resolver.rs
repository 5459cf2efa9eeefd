//! Entity resolution.
//!
//! Every extracted mention runs through the same cascade:
//!
//! 1. Exact: normalized name or slug equals a canonical entity in scope
//! 2. Alias: a user-taught mapping for (text, type, scope), falling back to
//!    an unscoped mapping; applying it bumps its usage counter
//! 3. Fuzzy: best similarity against every candidate in scope, banded by
//!    the high and medium thresholds
//!
//! Player factions are resolved first, in global scope. A validated faction
//! becomes the scope for that player's detachment, units and stratagems.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};

use crate::adapters::RulesDatabase;
use crate::domain::rules::slugify;
use crate::domain::{
    BattleReport, CanonicalEntity, Confidence, DraftReport, EntityType, FeedbackItem, Player,
    ResolutionOutput, ResolutionStatus, ResolvedStratagem, ResolvedUnit, StratagemMention,
    SuggestedMatch, UnitMention,
};
use crate::error::PipelineError;
use crate::store::AliasStore;

use super::similarity::{normalize, similarity};

/// Tunables for resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    /// At or above: auto-accept
    pub high_threshold: f64,

    /// At or above (and below high): attach a suggestion
    pub medium_threshold: f64,

    /// Mentions resolved concurrently
    pub worker_limit: usize,

    /// Suggestions stored on a feedback item
    pub max_suggestions: usize,

    /// Words of transcript context captured on each side of a mention
    pub context_words: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            high_threshold: 0.85,
            medium_threshold: 0.55,
            worker_limit: 5,
            max_suggestions: 3,
            context_words: 12,
        }
    }
}

/// Which cascade step produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    Alias,
    Fuzzy,
    Unmatched,
}

/// Outcome of resolving one name
#[derive(Debug, Clone, PartialEq)]
pub struct NameResolution {
    pub method: MatchMethod,
    pub score: f64,
    pub confidence: Confidence,
    pub status: ResolutionStatus,

    /// Accepted canonical entity (validated results only)
    pub canonical: Option<CanonicalEntity>,

    /// Best candidate when in the medium band
    pub suggestion: Option<SuggestedMatch>,

    /// Ranked (name, score) candidates, best first
    pub ranked: Vec<(String, f64)>,
}

impl NameResolution {
    fn validated(method: MatchMethod, entity: CanonicalEntity, score: f64) -> Self {
        Self {
            method,
            score,
            confidence: Confidence::High,
            status: ResolutionStatus::Validated,
            ranked: vec![(entity.name.clone(), score)],
            canonical: Some(entity),
            suggestion: None,
        }
    }

    fn unmatched() -> Self {
        Self {
            method: MatchMethod::Unmatched,
            score: 0.0,
            confidence: Confidence::Low,
            status: ResolutionStatus::Unvalidated,
            canonical: None,
            suggestion: None,
            ranked: Vec::new(),
        }
    }

    pub fn is_validated(&self) -> bool {
        self.status == ResolutionStatus::Validated
    }
}

/// Resolves draft reports against the rules database and alias store
#[derive(Clone)]
pub struct EntityResolver {
    rules: Arc<dyn RulesDatabase>,
    aliases: AliasStore,
    settings: ResolverSettings,
}

impl EntityResolver {
    pub fn new(rules: Arc<dyn RulesDatabase>, aliases: AliasStore, settings: ResolverSettings) -> Self {
        Self {
            rules,
            aliases,
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve one name through the exact, alias and fuzzy cascade
    pub async fn resolve_name(
        &self,
        text: &str,
        entity_type: EntityType,
        faction_scope: Option<&str>,
    ) -> Result<NameResolution, PipelineError> {
        let key = normalize(text);
        if key.is_empty() {
            return Ok(NameResolution::unmatched());
        }

        let mut candidates = self.rules.candidates(entity_type, faction_scope).await?;
        if candidates.is_empty() && faction_scope.is_some() {
            debug!(%entity_type, ?faction_scope, "Empty faction scope, using global candidates");
            candidates = self.rules.candidates(entity_type, None).await?;
        }

        // 1. Exact
        let slug = slugify(text);
        if let Some(entity) = candidates
            .iter()
            .find(|c| normalize(&c.name) == key || c.slug == slug)
        {
            return Ok(NameResolution::validated(MatchMethod::Exact, entity.clone(), 1.0));
        }

        // 2. Alias
        if let Some(mapping) = self.aliases.apply_alias(text, entity_type, faction_scope).await? {
            let target = normalize(&mapping.canonical_name);
            let entity = match candidates.iter().find(|c| normalize(&c.name) == target) {
                Some(entity) => entity.clone(),
                None => match self.rules.find(entity_type, &mapping.canonical_name, None).await? {
                    Some(entity) => entity,
                    None => CanonicalEntity::new(entity_type, mapping.canonical_name.clone(), faction_scope),
                },
            };
            debug!(
                alias = %mapping.alias,
                canonical = %entity.name,
                usage = mapping.usage_count,
                "Resolved via alias"
            );
            return Ok(NameResolution::validated(MatchMethod::Alias, entity, 1.0));
        }

        // 3. Fuzzy
        let ranked = self.rank(text, entity_type, &candidates).await?;
        let Some((best, score)) = ranked.first().map(|(entity, score)| (*entity, *score)) else {
            return Ok(NameResolution::unmatched());
        };

        if score >= self.settings.high_threshold {
            return Ok(NameResolution::validated(MatchMethod::Fuzzy, best.clone(), score));
        }

        let names = ranked
            .iter()
            .take(self.settings.max_suggestions)
            .map(|(entity, score)| (entity.name.clone(), *score))
            .collect();

        if score >= self.settings.medium_threshold {
            Ok(NameResolution {
                method: MatchMethod::Fuzzy,
                score,
                confidence: Confidence::Medium,
                status: ResolutionStatus::Unvalidated,
                canonical: None,
                suggestion: Some(SuggestedMatch::from_entity(best, score)),
                ranked: names,
            })
        } else {
            Ok(NameResolution {
                method: MatchMethod::Fuzzy,
                score,
                confidence: Confidence::Low,
                status: ResolutionStatus::Unvalidated,
                canonical: None,
                suggestion: None,
                ranked: names,
            })
        }
    }

    /// Score every candidate, best first.
    ///
    /// Ties on the top score go to the candidate with the most alias usage,
    /// then to the lexicographically smallest name.
    async fn rank<'a>(
        &self,
        text: &str,
        entity_type: EntityType,
        candidates: &'a [CanonicalEntity],
    ) -> Result<Vec<(&'a CanonicalEntity, f64)>, PipelineError> {
        let mut scored: Vec<(&CanonicalEntity, f64)> = candidates
            .iter()
            .map(|c| (c, similarity(text, &c.name)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });

        let Some(&(_, top)) = scored.first() else {
            return Ok(scored);
        };
        let tied = scored
            .iter()
            .take_while(|(_, score)| (top - score).abs() < f64::EPSILON)
            .count();

        if tied > 1 {
            let mut winner = 0;
            let mut winner_usage = self.aliases.usage_for(&scored[0].0.name, entity_type).await?;
            for i in 1..tied {
                let usage = self.aliases.usage_for(&scored[i].0.name, entity_type).await?;
                // Names are already ascending, so only strictly higher usage wins
                if usage > winner_usage {
                    winner = i;
                    winner_usage = usage;
                }
            }
            if winner != 0 {
                let entry = scored.remove(winner);
                scored.insert(0, entry);
            }
        }

        Ok(scored)
    }

    /// Resolve a full draft report, raising feedback for low-confidence entries
    #[instrument(skip(self, draft, transcript), fields(video_id = %video_id))]
    pub async fn resolve_report(
        &self,
        video_id: &str,
        draft: &DraftReport,
        transcript: &str,
    ) -> Result<ResolutionOutput, PipelineError> {
        let limit = self.settings.worker_limit.max(1);

        // Futures are built eagerly so the stream holds no borrowing closure
        let pending: Vec<_> = draft
            .players
            .iter()
            .enumerate()
            .map(|(index, player)| self.resolve_player(video_id, index, player, transcript))
            .collect();
        let players: Vec<(Player, Option<String>, Vec<FeedbackItem>)> = stream::iter(pending)
            .buffered(limit)
            .try_collect()
            .await?;

        let scopes: Vec<Option<String>> = players.iter().map(|(_, scope, _)| scope.clone()).collect();
        let scope_for = |index: Option<usize>| -> Option<String> {
            index.and_then(|i| scopes.get(i).cloned().flatten())
        };

        let pending: Vec<_> = draft
            .units
            .iter()
            .map(|mention| self.resolve_unit(video_id, mention, scope_for(Some(mention.player_index)), transcript))
            .collect();
        let units: Vec<(ResolvedUnit, Option<FeedbackItem>)> = stream::iter(pending)
            .buffered(limit)
            .try_collect()
            .await?;

        let pending: Vec<_> = draft
            .stratagems
            .iter()
            .map(|mention| self.resolve_stratagem(video_id, mention, scope_for(mention.player_index), transcript))
            .collect();
        let stratagems: Vec<(ResolvedStratagem, Option<FeedbackItem>)> = stream::iter(pending)
            .buffered(limit)
            .try_collect()
            .await?;

        let mut feedback: Vec<FeedbackItem> = Vec::new();
        let mut push_feedback = |item: FeedbackItem| {
            if !feedback.iter().any(|existing| existing.id == item.id) {
                feedback.push(item);
            }
        };

        let mut resolved_players = Vec::with_capacity(players.len());
        for (player, _, items) in players {
            resolved_players.push(player);
            items.into_iter().for_each(&mut push_feedback);
        }
        let mut resolved_units = Vec::with_capacity(units.len());
        for (unit, item) in units {
            resolved_units.push(unit);
            item.into_iter().for_each(&mut push_feedback);
        }
        let mut resolved_stratagems = Vec::with_capacity(stratagems.len());
        for (strat, item) in stratagems {
            resolved_stratagems.push(strat);
            item.into_iter().for_each(&mut push_feedback);
        }

        let report = BattleReport {
            video_id: video_id.to_string(),
            players: resolved_players,
            units: resolved_units,
            stratagems: resolved_stratagems,
            mission: draft.mission.clone(),
            points_limit: draft.points_limit,
            extracted_at: Utc::now(),
            pending_feedback: feedback.iter().map(|item| item.id.clone()).collect(),
        };

        info!(
            units = report.units.len(),
            stratagems = report.stratagems.len(),
            needs_review = report.needs_review().len(),
            feedback = feedback.len(),
            "Resolved report"
        );

        Ok(ResolutionOutput { report, feedback })
    }

    /// Resolve a player's faction and detachment.
    ///
    /// Returns the player, the faction scope for their entries (only when the
    /// faction validated) and any feedback raised.
    async fn resolve_player(
        &self,
        video_id: &str,
        index: usize,
        player: &Player,
        transcript: &str,
    ) -> Result<(Player, Option<String>, Vec<FeedbackItem>), PipelineError> {
        let mut resolved = player.clone();
        let mut feedback = Vec::new();

        let faction = self.resolve_name(&player.faction, EntityType::Faction, None).await?;
        resolved.confidence = faction.confidence;
        let scope = match faction.canonical {
            Some(ref entity) if faction.is_validated() => {
                resolved.faction = entity.name.clone();
                Some(entity.name.clone())
            }
            // No suggestion slot on a player, so anything short of a match
            // goes to the user
            _ => {
                let item = self.feedback(
                    video_id,
                    &player.faction,
                    EntityType::Faction,
                    Some(index),
                    &faction,
                    None,
                    transcript,
                );
                feedback.extend(self.raise(item).await?);
                None
            }
        };

        if let Some(ref detachment) = player.detachment {
            let resolution = self
                .resolve_name(detachment, EntityType::Detachment, scope.as_deref())
                .await?;
            match resolution.canonical {
                Some(ref entity) if resolution.is_validated() => {
                    resolved.detachment = Some(entity.name.clone());
                }
                _ => {
                    let item = self.feedback(
                        video_id,
                        detachment,
                        EntityType::Detachment,
                        Some(index),
                        &resolution,
                        scope.clone(),
                        transcript,
                    );
                    feedback.extend(self.raise(item).await?);
                }
            }
        }

        Ok((resolved, scope, feedback))
    }

    async fn resolve_unit(
        &self,
        video_id: &str,
        mention: &UnitMention,
        scope: Option<String>,
        transcript: &str,
    ) -> Result<(ResolvedUnit, Option<FeedbackItem>), PipelineError> {
        let resolution = self
            .resolve_name(&mention.name, EntityType::Unit, scope.as_deref())
            .await?;

        let feedback = match resolution.confidence {
            Confidence::Low => {
                let item = self.feedback(
                    video_id,
                    &mention.name,
                    EntityType::Unit,
                    Some(mention.player_index),
                    &resolution,
                    scope.clone(),
                    transcript,
                );
                self.raise(item).await?
            }
            _ => None,
        };

        let canonical = resolution.canonical.as_ref();
        let unit = ResolvedUnit {
            name: mention.name.clone(),
            player_index: mention.player_index,
            points: mention.points,
            confidence: resolution.confidence,
            status: resolution.status,
            canonical_name: canonical.map(|e| e.name.clone()),
            match_score: resolution.score,
            stats: canonical.and_then(|e| e.stats.clone()),
            keywords: canonical.map(|e| e.keywords.clone()).unwrap_or_default(),
            suggested_match: resolution.suggestion.clone(),
            faction_scope: scope,
            feedback_id: feedback.as_ref().map(|item| item.id.clone()),
        };

        Ok((unit, feedback))
    }

    async fn resolve_stratagem(
        &self,
        video_id: &str,
        mention: &StratagemMention,
        scope: Option<String>,
        transcript: &str,
    ) -> Result<(ResolvedStratagem, Option<FeedbackItem>), PipelineError> {
        let resolution = self
            .resolve_name(&mention.name, EntityType::Stratagem, scope.as_deref())
            .await?;

        let feedback = match resolution.confidence {
            Confidence::Low => {
                let item = self.feedback(
                    video_id,
                    &mention.name,
                    EntityType::Stratagem,
                    mention.player_index,
                    &resolution,
                    scope.clone(),
                    transcript,
                );
                self.raise(item).await?
            }
            _ => None,
        };

        let strat = ResolvedStratagem {
            name: mention.name.clone(),
            player_index: mention.player_index,
            confidence: resolution.confidence,
            status: resolution.status,
            canonical_name: resolution.canonical.as_ref().map(|e| e.name.clone()),
            match_score: resolution.score,
            suggested_match: resolution.suggestion.clone(),
            faction_scope: scope,
            feedback_id: feedback.as_ref().map(|item| item.id.clone()),
        };

        Ok((strat, feedback))
    }

    /// Skip items the user already closed, so an ignored token stays quiet
    /// when the video is processed again
    async fn raise(&self, item: FeedbackItem) -> Result<Option<FeedbackItem>, PipelineError> {
        match self.aliases.get_feedback(&item.id).await? {
            Some(existing) if existing.status.is_terminal() => Ok(None),
            _ => Ok(Some(item)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn feedback(
        &self,
        video_id: &str,
        raw_token: &str,
        entity_type: EntityType,
        player_index: Option<usize>,
        resolution: &NameResolution,
        faction_scope: Option<String>,
        transcript: &str,
    ) -> FeedbackItem {
        let suggestions = resolution
            .ranked
            .iter()
            .take(self.settings.max_suggestions)
            .cloned()
            .collect();

        FeedbackItem::pending(
            video_id,
            raw_token,
            entity_type,
            player_index,
            mention_context(transcript, raw_token, self.settings.context_words),
            resolution.score,
            suggestions,
            faction_scope,
        )
    }
}

/// Up to `radius` words on each side of the first occurrence of `mention`
/// (case-insensitive). Empty when the mention does not appear verbatim.
pub fn mention_context(transcript: &str, mention: &str, radius: usize) -> String {
    let needle = mention.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return String::new();
    }

    // ASCII lowercasing keeps byte offsets aligned with the original text
    let haystack = transcript.to_ascii_lowercase();
    let Some(start) = haystack.find(&needle) else {
        return String::new();
    };
    let end = start + needle.len();

    let before: Vec<&str> = transcript[..start].split_whitespace().collect();
    let after = transcript[end..].split_whitespace().take(radius);

    before[before.len().saturating_sub(radius)..]
        .iter()
        .copied()
        .chain(std::iter::once(&transcript[start..end]))
        .chain(after)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::JsonRulesDatabase;

    fn resolver() -> EntityResolver {
        let rules = JsonRulesDatabase::from_entities([
            CanonicalEntity::new(EntityType::Faction, "Orks", None),
            CanonicalEntity::new(EntityType::Unit, "Boyz", Some("Orks")),
            CanonicalEntity::new(EntityType::Unit, "Warboss", Some("Orks")),
            CanonicalEntity::new(EntityType::Unit, "Big Mek on Warbike", Some("Orks")),
            CanonicalEntity::new(EntityType::Unit, "Big Mek in Mega Armour", Some("Orks")),
        ]);
        EntityResolver::new(
            Arc::new(rules),
            AliasStore::in_memory().unwrap(),
            ResolverSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_exact_match_ignores_case_and_spacing() {
        let resolver = resolver();
        let resolution = resolver
            .resolve_name("  BOYZ ", EntityType::Unit, Some("Orks"))
            .await
            .unwrap();

        assert_eq!(resolution.method, MatchMethod::Exact);
        assert_eq!(resolution.confidence, Confidence::High);
        assert_eq!(resolution.canonical.unwrap().name, "Boyz");
    }

    #[tokio::test]
    async fn test_partial_name_ranks_closest_candidate_first() {
        let resolver = resolver();
        let resolution = resolver
            .resolve_name("Big Mek", EntityType::Unit, Some("Orks"))
            .await
            .unwrap();

        assert_eq!(resolution.confidence, Confidence::Low);
        assert!(resolution.canonical.is_none());
        assert_eq!(resolution.ranked[0].0, "Big Mek on Warbike");
        assert!(resolution.ranked.len() <= 3);
    }

    #[tokio::test]
    async fn test_tie_broken_by_usage() {
        let rules = JsonRulesDatabase::from_entities([
            CanonicalEntity::new(EntityType::Unit, "Alpha Squad", None),
            CanonicalEntity::new(EntityType::Unit, "Squad Alpha", None),
        ]);
        let aliases = AliasStore::in_memory().unwrap();
        let resolver = EntityResolver::new(Arc::new(rules), aliases.clone(), ResolverSettings::default());

        // Both candidates score identically against this text
        let before = resolver.rank_names("Alpha Squads", EntityType::Unit).await;
        assert_eq!(before[0].0, "Alpha Squad");

        aliases
            .upsert_mapping("alpha", "Squad Alpha", EntityType::Unit, None)
            .await
            .unwrap();
        aliases.apply_alias("alpha", EntityType::Unit, None).await.unwrap();

        let after = resolver.rank_names("Alpha Squads", EntityType::Unit).await;
        assert_eq!(after[0].0, "Squad Alpha");
    }

    #[tokio::test]
    async fn test_unknown_faction_raises_feedback() {
        let resolver = resolver();
        let player = Player {
            name: "Bob".to_string(),
            faction: "Xenos of some kind".to_string(),
            detachment: None,
            confidence: Confidence::Medium,
        };

        let (resolved, scope, feedback) = resolver.resolve_player("vid1", 0, &player, "").await.unwrap();
        assert!(scope.is_none());
        assert_eq!(resolved.faction, "Xenos of some kind");
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].entity_type, EntityType::Faction);
        assert_eq!(feedback[0].player_index, Some(0));
    }

    #[test]
    fn test_mention_context() {
        let transcript = "and then the Big Mek rolls forward into the ruins";
        assert_eq!(mention_context(transcript, "big mek", 2), "then the Big Mek rolls forward");
        assert_eq!(mention_context(transcript, "Warboss", 2), "");
        assert_eq!(mention_context("Big Mek", "Big Mek", 5), "Big Mek");
    }

    impl EntityResolver {
        async fn rank_names(&self, text: &str, entity_type: EntityType) -> Vec<(String, f64)> {
            let candidates = self.rules.candidates(entity_type, None).await.unwrap();
            self.rank(text, entity_type, &candidates)
                .await
                .unwrap()
                .into_iter()
                .map(|(entity, score)| (entity.name.clone(), score))
                .collect()
        }
    }
}
