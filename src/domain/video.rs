//! Transcript data as delivered by the acquisition collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw transcript for one video. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoData {
    /// Video identifier (cache key)
    pub video_id: String,

    /// Raw transcript text
    pub text: String,

    /// Optional per-player metadata (e.g. from the video description)
    #[serde(default)]
    pub players: Vec<PlayerMetadata>,

    /// When the transcript was acquired
    pub fetched_at: DateTime<Utc>,
}

impl VideoData {
    pub fn new(video_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            text: text.into(),
            players: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_player(mut self, player: PlayerMetadata) -> Self {
        self.players.push(player);
        self
    }
}

/// Player hints supplied alongside a transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMetadata {
    pub name: String,
    #[serde(default)]
    pub faction: Option<String>,
}

impl PlayerMetadata {
    pub fn new(name: impl Into<String>, faction: Option<&str>) -> Self {
        Self {
            name: name.into(),
            faction: faction.map(str::to_string),
        }
    }
}
