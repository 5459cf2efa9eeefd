//! Battle report structures, from raw mentions to resolved entities.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::feedback::EntityType;
use super::rules::CanonicalEntity;

/// Characteristic name -> value (e.g. "M" -> "6\"", "T" -> "4")
pub type UnitStats = BTreeMap<String, String>;

/// Coarse confidence bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Medium
    }
}

/// Whether a mention was matched to a canonical entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Validated,
    Unvalidated,
}

/// A player in the match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,

    /// Faction name (canonical once resolved)
    pub faction: String,

    #[serde(default)]
    pub detachment: Option<String>,

    pub confidence: Confidence,
}

/// A unit named in the transcript, before resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMention {
    pub name: String,
    pub player_index: usize,
    #[serde(default)]
    pub points: Option<u32>,
    pub confidence: Confidence,
}

/// A stratagem named in the transcript, before resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratagemMention {
    pub name: String,
    #[serde(default)]
    pub player_index: Option<usize>,
    pub confidence: Confidence,
}

/// Validated output of the extraction stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftReport {
    pub players: Vec<Player>,
    pub units: Vec<UnitMention>,
    pub stratagems: Vec<StratagemMention>,
    pub mission: Option<String>,
    pub points_limit: Option<u32>,
}

/// Candidate offered when no confident match was found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedMatch {
    pub name: String,
    pub score: f64,
    #[serde(default)]
    pub stats: Option<UnitStats>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SuggestedMatch {
    pub fn from_entity(entity: &CanonicalEntity, score: f64) -> Self {
        Self {
            name: entity.name.clone(),
            score,
            stats: entity.stats.clone(),
            keywords: entity.keywords.clone(),
        }
    }
}

/// A unit mention after resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedUnit {
    /// Name as extracted
    pub name: String,
    pub player_index: usize,
    pub points: Option<u32>,
    pub confidence: Confidence,
    pub status: ResolutionStatus,
    pub canonical_name: Option<String>,

    /// Score of the winning match (1.0 for exact and alias hits)
    pub match_score: f64,

    pub stats: Option<UnitStats>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub suggested_match: Option<SuggestedMatch>,

    /// Faction scope the mention was resolved in
    pub faction_scope: Option<String>,

    /// Pending feedback raised for this unit
    pub feedback_id: Option<String>,
}

impl ResolvedUnit {
    /// Replace resolution data with a canonical entity
    pub fn apply_canonical(&mut self, entity: &CanonicalEntity) {
        self.canonical_name = Some(entity.name.clone());
        self.stats = entity.stats.clone();
        self.keywords = entity.keywords.clone();
        self.match_score = 1.0;
        self.confidence = Confidence::High;
        self.status = ResolutionStatus::Validated;
        self.suggested_match = None;
        self.feedback_id = None;
    }
}

/// A stratagem mention after resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStratagem {
    pub name: String,
    pub player_index: Option<usize>,
    pub confidence: Confidence,
    pub status: ResolutionStatus,
    pub canonical_name: Option<String>,
    pub match_score: f64,
    pub suggested_match: Option<SuggestedMatch>,
    pub faction_scope: Option<String>,
    pub feedback_id: Option<String>,
}

impl ResolvedStratagem {
    pub fn apply_canonical(&mut self, entity: &CanonicalEntity) {
        self.canonical_name = Some(entity.name.clone());
        self.match_score = 1.0;
        self.confidence = Confidence::High;
        self.status = ResolutionStatus::Validated;
        self.suggested_match = None;
        self.feedback_id = None;
    }
}

/// The finished, resolved report for one video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleReport {
    pub video_id: String,
    pub players: Vec<Player>,
    pub units: Vec<ResolvedUnit>,
    pub stratagems: Vec<ResolvedStratagem>,
    pub mission: Option<String>,
    pub points_limit: Option<u32>,
    pub extracted_at: DateTime<Utc>,

    /// Feedback items raised while resolving this report
    #[serde(default)]
    pub pending_feedback: Vec<String>,
}

/// Address of an entry in a report that can carry a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum ReportSlot {
    Unit(usize),
    Stratagem(usize),
}

/// What changed when a suggestion was accepted
#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    pub raw_name: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub faction_scope: Option<String>,
    pub feedback_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("{slot:?} is out of range ({len} entries)")]
    OutOfRange { slot: ReportSlot, len: usize },

    #[error("{0:?} has no suggestion to accept")]
    NoSuggestion(ReportSlot),
}

impl BattleReport {
    /// Check the player-count and player-index invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.players.is_empty() || self.players.len() > 2 {
            return Err(format!(
                "report must have 1 or 2 players, found {}",
                self.players.len()
            ));
        }

        let count = self.players.len();
        if let Some(unit) = self.units.iter().find(|u| u.player_index >= count) {
            return Err(format!(
                "unit '{}' references player {} of {}",
                unit.name, unit.player_index, count
            ));
        }
        if let Some(strat) = self
            .stratagems
            .iter()
            .find(|s| s.player_index.is_some_and(|i| i >= count))
        {
            return Err(format!(
                "stratagem '{}' references a player outside 0..{}",
                strat.name, count
            ));
        }

        Ok(())
    }

    /// Units and stratagems still awaiting review
    pub fn needs_review(&self) -> Vec<ReportSlot> {
        let units = self
            .units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.status == ResolutionStatus::Unvalidated)
            .map(|(i, _)| ReportSlot::Unit(i));
        let stratagems = self
            .stratagems
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == ResolutionStatus::Unvalidated)
            .map(|(i, _)| ReportSlot::Stratagem(i));
        units.chain(stratagems).collect()
    }

    /// Accept the suggestion attached to a slot.
    ///
    /// Returns `Ok(None)` when the entry is already validated, which makes
    /// repeated acceptance a no-op.
    pub fn accept_suggestion(&mut self, slot: ReportSlot) -> Result<Option<Acceptance>, SlotError> {
        let acceptance = match slot {
            ReportSlot::Unit(index) => {
                let len = self.units.len();
                let unit = self
                    .units
                    .get_mut(index)
                    .ok_or(SlotError::OutOfRange { slot, len })?;
                if unit.status == ResolutionStatus::Validated {
                    return Ok(None);
                }
                let suggestion = unit
                    .suggested_match
                    .take()
                    .ok_or(SlotError::NoSuggestion(slot))?;
                let feedback_id = unit.feedback_id.take();

                unit.canonical_name = Some(suggestion.name.clone());
                unit.stats = suggestion.stats;
                unit.keywords = suggestion.keywords;
                unit.match_score = 1.0;
                unit.confidence = Confidence::High;
                unit.status = ResolutionStatus::Validated;

                Acceptance {
                    raw_name: unit.name.clone(),
                    canonical_name: suggestion.name,
                    entity_type: EntityType::Unit,
                    faction_scope: unit.faction_scope.clone(),
                    feedback_id,
                }
            }
            ReportSlot::Stratagem(index) => {
                let len = self.stratagems.len();
                let strat = self
                    .stratagems
                    .get_mut(index)
                    .ok_or(SlotError::OutOfRange { slot, len })?;
                if strat.status == ResolutionStatus::Validated {
                    return Ok(None);
                }
                let suggestion = strat
                    .suggested_match
                    .take()
                    .ok_or(SlotError::NoSuggestion(slot))?;
                let feedback_id = strat.feedback_id.take();

                strat.canonical_name = Some(suggestion.name.clone());
                strat.match_score = 1.0;
                strat.confidence = Confidence::High;
                strat.status = ResolutionStatus::Validated;

                Acceptance {
                    raw_name: strat.name.clone(),
                    canonical_name: suggestion.name,
                    entity_type: EntityType::Stratagem,
                    faction_scope: strat.faction_scope.clone(),
                    feedback_id,
                }
            }
        };

        if let Some(ref id) = acceptance.feedback_id {
            self.pending_feedback.retain(|pending| pending != id);
        }

        Ok(Some(acceptance))
    }

    /// Apply a resolved feedback item to every entry that raised it.
    ///
    /// Returns true if anything changed.
    pub fn apply_feedback(&mut self, feedback_id: &str, player_index: Option<usize>, entity: &CanonicalEntity) -> bool {
        let mut changed = false;

        match entity.entity_type {
            EntityType::Unit => {
                for unit in self
                    .units
                    .iter_mut()
                    .filter(|u| u.feedback_id.as_deref() == Some(feedback_id))
                {
                    unit.apply_canonical(entity);
                    changed = true;
                }
            }
            EntityType::Stratagem => {
                for strat in self
                    .stratagems
                    .iter_mut()
                    .filter(|s| s.feedback_id.as_deref() == Some(feedback_id))
                {
                    strat.apply_canonical(entity);
                    changed = true;
                }
            }
            EntityType::Faction => {
                if let Some(player) = player_index.and_then(|i| self.players.get_mut(i)) {
                    player.faction = entity.name.clone();
                    player.confidence = Confidence::High;
                    changed = true;
                }
            }
            EntityType::Detachment => {
                if let Some(player) = player_index.and_then(|i| self.players.get_mut(i)) {
                    player.detachment = Some(entity.name.clone());
                    changed = true;
                }
            }
        }

        let before = self.pending_feedback.len();
        self.pending_feedback.retain(|pending| pending != feedback_id);
        changed || before != self.pending_feedback.len()
    }

    /// Drop a feedback id from the pending list without changing entries
    pub fn dismiss_feedback(&mut self, feedback_id: &str) -> bool {
        let before = self.pending_feedback.len();
        self.pending_feedback.retain(|pending| pending != feedback_id);
        for unit in self.units.iter_mut().filter(|u| u.feedback_id.as_deref() == Some(feedback_id)) {
            unit.feedback_id = None;
        }
        for strat in self
            .stratagems
            .iter_mut()
            .filter(|s| s.feedback_id.as_deref() == Some(feedback_id))
        {
            strat.feedback_id = None;
        }
        before != self.pending_feedback.len()
    }
}
