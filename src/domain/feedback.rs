//! Feedback items and user-taught alias mappings.
//!
//! Feedback items surface low-confidence resolutions for a user decision.
//! Resolving one produces a `UserMapping`, which the resolver consults before
//! fuzzy scoring on every later run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::similarity::normalize;

/// Kind of canonical entity a mention refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Unit,
    Stratagem,
    Faction,
    Detachment,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Unit => "unit",
            EntityType::Stratagem => "stratagem",
            EntityType::Faction => "faction",
            EntityType::Detachment => "detachment",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(EntityType::Unit),
            "stratagem" => Ok(EntityType::Stratagem),
            "faction" => Ok(EntityType::Faction),
            "detachment" => Ok(EntityType::Detachment),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

/// Lifecycle of a feedback item. `Resolved` and `Ignored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Resolved,
    Ignored,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Pending => "pending",
            FeedbackStatus::Resolved => "resolved",
            FeedbackStatus::Ignored => "ignored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FeedbackStatus::Pending)
    }
}

impl FromStr for FeedbackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FeedbackStatus::Pending),
            "resolved" => Ok(FeedbackStatus::Resolved),
            "ignored" => Ok(FeedbackStatus::Ignored),
            other => Err(format!("unknown feedback status: {}", other)),
        }
    }
}

/// A low-confidence resolution awaiting a user decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    /// Deterministic id over (video, entity type, token, scope)
    pub id: String,

    pub video_id: String,

    /// Mention text as extracted
    pub raw_token: String,

    pub entity_type: EntityType,

    pub player_index: Option<usize>,

    /// Transcript words surrounding the mention
    pub context: String,

    /// Best fuzzy score observed
    pub confidence_score: f64,

    /// Ranked (canonical name, score) candidates
    pub suggestions: Vec<(String, f64)>,

    pub status: FeedbackStatus,

    pub resolved_to: Option<String>,

    pub faction_scope: Option<String>,

    pub created_at: DateTime<Utc>,

    pub resolved_at: Option<DateTime<Utc>>,
}

impl FeedbackItem {
    /// Create a pending feedback item
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        video_id: &str,
        raw_token: &str,
        entity_type: EntityType,
        player_index: Option<usize>,
        context: String,
        confidence_score: f64,
        suggestions: Vec<(String, f64)>,
        faction_scope: Option<String>,
    ) -> Self {
        Self {
            id: feedback_id(video_id, entity_type, raw_token, faction_scope.as_deref()),
            video_id: video_id.to_string(),
            raw_token: raw_token.to_string(),
            entity_type,
            player_index,
            context,
            confidence_score,
            suggestions,
            status: FeedbackStatus::Pending,
            resolved_to: None,
            faction_scope,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Best suggestion, if any
    pub fn top_suggestion(&self) -> Option<&str> {
        self.suggestions.first().map(|(name, _)| name.as_str())
    }
}

/// Generate a feedback id. Re-running a video yields the same ids, so pending
/// items are never duplicated.
pub fn feedback_id(
    video_id: &str,
    entity_type: EntityType,
    raw_token: &str,
    faction_scope: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(video_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(entity_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(raw_token).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(faction_scope.unwrap_or_default()).as_bytes());
    let digest = hasher.finalize();
    format!("fb-{}", hex::encode(&digest[..8]))
}

/// A user-taught alias from colloquial text to a canonical name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMapping {
    pub id: Uuid,
    pub alias: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub faction_scope: Option<String>,
    pub created_at: DateTime<Utc>,

    /// Incremented every time the resolver applies this mapping
    pub usage_count: u64,
}
