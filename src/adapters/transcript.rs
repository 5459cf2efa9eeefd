//! Directory-backed transcript source.
//!
//! Reads `<root>/<video_id>.txt` for the transcript and, when present,
//! `<root>/<video_id>.json` for player metadata:
//!
//! ```json
//! { "players": [{ "name": "Alice", "faction": "Orks" }] }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{PlayerMetadata, VideoData};
use crate::error::PipelineError;

use super::TranscriptSource;

#[derive(Debug, Default, Deserialize)]
struct TranscriptMetadata {
    #[serde(default)]
    players: Vec<PlayerMetadata>,
}

/// Transcript source reading plain-text files from a directory
#[derive(Debug, Clone)]
pub struct DirectoryTranscripts {
    root: PathBuf,
}

impl DirectoryTranscripts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Video ids are used as file names, so only allow a safe character set
fn validate_video_id(video_id: &str) -> Result<(), String> {
    if video_id.is_empty() {
        return Err("video id is empty".to_string());
    }
    if video_id.starts_with('.') {
        return Err("video id must not start with '.'".to_string());
    }
    if let Some(c) = video_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("video id contains invalid character '{}'", c));
    }
    Ok(())
}

#[async_trait]
impl TranscriptSource for DirectoryTranscripts {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch(&self, video_id: &str) -> Result<VideoData, PipelineError> {
        let acquisition = |reason: String| PipelineError::Acquisition {
            video_id: video_id.to_string(),
            reason,
        };

        validate_video_id(video_id).map_err(acquisition)?;

        let text_path = self.root.join(format!("{}.txt", video_id));
        let text = tokio::fs::read_to_string(&text_path)
            .await
            .map_err(|e| acquisition(format!("{}: {}", text_path.display(), e)))?;

        if text.trim().is_empty() {
            return Err(acquisition("transcript is empty".to_string()));
        }

        let meta_path = self.root.join(format!("{}.json", video_id));
        let metadata = match tokio::fs::read_to_string(&meta_path).await {
            Ok(content) => serde_json::from_str::<TranscriptMetadata>(&content)
                .map_err(|e| acquisition(format!("{}: {}", meta_path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TranscriptMetadata::default(),
            Err(e) => return Err(acquisition(format!("{}: {}", meta_path.display(), e))),
        };

        debug!(
            video_id,
            bytes = text.len(),
            players = metadata.players.len(),
            "Loaded transcript"
        );

        let mut video = VideoData::new(video_id, text);
        video.players = metadata.players;
        Ok(video)
    }
}
