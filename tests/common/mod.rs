//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use warscribe::adapters::{
    GenerationOutcome, GenerativeExtractor, JsonRulesDatabase, TranscriptSource, TransportError,
};
use warscribe::domain::{PlayerMetadata, VideoData};
use warscribe::error::PipelineError;
use warscribe::service::{PipelineSettings, ReportService};
use warscribe::store::{AliasStore, ExtractionCache};

pub const RULES_JSON: &str = r#"{
  "factions": [{ "name": "Orks" }, { "name": "Space Marines" }],
  "detachments": [
    { "name": "War Horde", "faction": "Orks" },
    { "name": "Gladius Task Force", "faction": "Space Marines" }
  ],
  "units": [
    { "name": "Boyz", "faction": "Orks", "keywords": ["Infantry", "Mob"] },
    { "name": "Warboss", "faction": "Orks", "keywords": ["Character"] },
    { "name": "Big Mek on Warbike", "faction": "Orks" },
    { "name": "Big Mek in Mega Armour", "faction": "Orks" },
    { "name": "Intercessors", "faction": "Space Marines",
      "stats": { "M": "6\"", "T": "4", "Sv": "3+", "W": "2" }, "keywords": ["Infantry"] },
    { "name": "Redemptor Dreadnought", "faction": "Space Marines" }
  ],
  "stratagems": [
    { "name": "Command Re-roll" },
    { "name": "Armour of Contempt", "faction": "Space Marines" },
    { "name": "Careen!", "faction": "Orks" }
  ]
}"#;

pub const TRANSCRIPT: &str = "[Music]\n\
00:00 Welcome back to the channel, today Alice brings Space Marines against Bob and his Orks.\n\
\n\
00:45 Deployment\n\
Alice puts her Intercessors on the objective while the Big Mek hides behind the ruins.\n\
\n\
03:10 Turn 1\n\
Bob pops Careen and the Boyz charge in.\n";

pub fn rules() -> Arc<JsonRulesDatabase> {
    Arc::new(JsonRulesDatabase::from_json(RULES_JSON).unwrap())
}

/// Extractor that replays queued outcomes and counts calls
#[derive(Default)]
pub struct ScriptedExtractor {
    outcomes: Mutex<VecDeque<Result<GenerationOutcome, TransportError>>>,
    calls: AtomicU32,
}

impl ScriptedExtractor {
    pub fn new(outcomes: impl IntoIterator<Item = Result<GenerationOutcome, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicU32::new(0),
        })
    }

    /// Every call answers with the same reply
    pub fn always(reply: Value) -> Arc<Self> {
        Self::new((0..16).map(|_| Ok(GenerationOutcome::Parsed(reply.clone()))))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeExtractor for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str, _schema: &Value) -> Result<GenerationOutcome, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("script exhausted".to_string())))
    }
}

/// Transcript source backed by a map, counting fetches
#[derive(Default)]
pub struct MemoryTranscripts {
    videos: HashMap<String, VideoData>,
    fetches: AtomicU32,
}

impl MemoryTranscripts {
    pub fn with_video(mut self, video: VideoData) -> Self {
        self.videos.insert(video.video_id.clone(), video);
        self
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptSource for MemoryTranscripts {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, video_id: &str) -> Result<VideoData, PipelineError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.videos
            .get(video_id)
            .cloned()
            .ok_or_else(|| PipelineError::Acquisition {
                video_id: video_id.to_string(),
                reason: "no such video".to_string(),
            })
    }
}

pub fn video(video_id: &str) -> VideoData {
    VideoData::new(video_id, TRANSCRIPT)
        .with_player(PlayerMetadata::new("Alice", Some("Space Marines")))
        .with_player(PlayerMetadata::new("Bob", Some("Orks")))
}

/// A reply naming Space Marines and Orks, with the units given
pub fn reply_with_units(units: &[(&str, usize)]) -> Value {
    let units: Vec<Value> = units
        .iter()
        .map(|(name, player)| json!({ "name": name, "player_index": player, "confidence": "high" }))
        .collect();
    json!({
        "players": [
            { "name": "Alice", "faction": "Space Marines", "detachment": "Gladius Task Force", "confidence": "high" },
            { "name": "Bob", "faction": "Orks", "detachment": "War Horde", "confidence": "high" }
        ],
        "units": units,
        "stratagems": [
            { "name": "Careen", "player_index": 1, "confidence": "medium" },
            { "name": "Command Re-roll", "player_index": null, "confidence": "high" }
        ],
        "mission": "Take and Hold",
        "points_limit": 2000
    })
}

pub fn service_with(
    source: Arc<MemoryTranscripts>,
    extractor: Arc<ScriptedExtractor>,
    aliases: AliasStore,
    cache: ExtractionCache,
) -> ReportService {
    ReportService::new(source, rules(), extractor, aliases, cache, PipelineSettings::default())
}

pub fn in_memory_service(source: Arc<MemoryTranscripts>, extractor: Arc<ScriptedExtractor>) -> ReportService {
    service_with(
        source,
        extractor,
        AliasStore::in_memory().unwrap(),
        ExtractionCache::in_memory().unwrap(),
    )
}
