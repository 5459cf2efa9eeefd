//! Pipeline stages.
//!
//! Each stage takes the previous stage's output by value and produces its
//! own. Stages never touch the stores; the service persists results once
//! the whole run has completed.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::adapters::RulesDatabase;
use crate::domain::{
    Chapter, CleanedTranscript, Detection, EntityType, Extraction, StageKind, StageOutput,
};
use crate::error::PipelineError;

use super::extraction::ExtractionInvoker;
use super::resolver::EntityResolver;
use super::similarity::normalize;

/// One step of the pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self, input: StageOutput) -> Result<StageOutput, PipelineError>;
}

fn unexpected(kind: StageKind, input: &StageOutput) -> PipelineError {
    PipelineError::UnexpectedInput {
        stage: kind.to_string(),
        found: input.label().to_string(),
    }
}

/// Generate a short content hash
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// ----------------------------------------------------------------------
// Preprocessing
// ----------------------------------------------------------------------

/// Strips caption noise and shapes the transcript into paragraphs
pub struct PreprocessStage {
    max_bytes: u64,
}

impl PreprocessStage {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

/// "12:34", "1:02:03", optionally wrapped in parentheses or trailed by punctuation
fn is_timestamp(token: &str) -> bool {
    let token = token.trim_matches(|c| matches!(c, '(' | ')' | ',' | '.' | '-'));
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return false;
    }
    parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        && parts[0].len() <= 2
        && parts[1..].iter().all(|p| p.len() == 2)
}

/// Remove `[Music]`-style tags. An unclosed bracket is kept as text.
fn strip_bracket_tags(line: &str) -> (String, usize) {
    let mut out = String::with_capacity(line.len());
    let mut removed = 0;
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        match rest[open..].find(']') {
            Some(close) => {
                out.push_str(&rest[..open]);
                out.push(' ');
                rest = &rest[open + close + 1..];
                removed += 1;
            }
            None => break,
        }
    }
    out.push_str(rest);
    (out, removed)
}

/// Clean one raw line. Returns the words kept, the noise count, and whether
/// the line was led by a timestamp.
fn clean_line(line: &str) -> (Vec<String>, usize, bool) {
    let (stripped, mut removed) = strip_bracket_tags(line);
    let mut words = Vec::new();
    let mut led_by_timestamp = false;

    for (i, token) in stripped.split_whitespace().enumerate() {
        if is_timestamp(token) {
            removed += 1;
            if i == 0 {
                led_by_timestamp = true;
            }
        } else {
            words.push(token.to_string());
        }
    }

    (words, removed, led_by_timestamp)
}

/// Phase heading at the start of a paragraph ("Deployment", "Turn 2", ...)
pub fn phase_heading(paragraph: &str) -> Option<String> {
    let words: Vec<String> = paragraph
        .split_whitespace()
        .take(3)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .collect();
    let word = |i: usize| words.get(i).map(String::as_str).unwrap_or("");

    let number = |w: &str| -> Option<u32> {
        match w {
            "one" => Some(1),
            "two" => Some(2),
            "three" => Some(3),
            "four" => Some(4),
            "five" => Some(5),
            other => other.parse().ok().filter(|n| (1..=9).contains(n)),
        }
    };

    match (word(0), word(1)) {
        ("deployment", _) => Some("Deployment".to_string()),
        ("results", _) | ("result", _) => Some("Results".to_string()),
        ("army", "lists") | ("army", "list") => Some("Army Lists".to_string()),
        ("turn", n) => number(n).map(|n| format!("Turn {}", n)),
        ("round", n) => number(n).map(|n| format!("Round {}", n)),
        ("battle", "round") => number(word(2)).map(|n| format!("Battle Round {}", n)),
        _ => None,
    }
}

/// Clean a raw transcript into blank-line separated paragraphs.
///
/// A blank raw line ends a paragraph, as does a timestamp-led line that
/// opens with a phase heading. Returns the text and the noise count.
pub fn clean_transcript(raw: &str) -> (String, usize) {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut removed = 0;

    let flush = |current: &mut Vec<String>, paragraphs: &mut Vec<String>| {
        if !current.is_empty() {
            paragraphs.push(current.join(" "));
            current.clear();
        }
    };

    for line in raw.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut paragraphs);
            continue;
        }

        let (words, noise, led_by_timestamp) = clean_line(line);
        removed += noise;
        if words.is_empty() {
            continue;
        }
        if led_by_timestamp && phase_heading(&words.join(" ")).is_some() {
            flush(&mut current, &mut paragraphs);
        }
        current.extend(words);
    }
    flush(&mut current, &mut paragraphs);

    (paragraphs.join("\n\n"), removed)
}

#[async_trait]
impl Stage for PreprocessStage {
    fn kind(&self) -> StageKind {
        StageKind::Preprocessing
    }

    async fn run(&self, input: StageOutput) -> Result<StageOutput, PipelineError> {
        let video = match input {
            StageOutput::Source(video) => video,
            other => return Err(unexpected(self.kind(), &other)),
        };

        let actual = video.text.len() as u64;
        if actual > self.max_bytes {
            return Err(PipelineError::InputTooLarge {
                actual,
                limit: self.max_bytes,
            });
        }

        let (text, removed_noise) = clean_transcript(&video.text);
        debug!(bytes_in = actual, bytes_out = text.len(), removed_noise, "Transcript cleaned");

        Ok(StageOutput::Preprocessed(CleanedTranscript {
            content_hash: hash_input(&video.text),
            video_id: video.video_id,
            text,
            removed_noise,
            player_hints: video.players,
        }))
    }
}

// ----------------------------------------------------------------------
// Detection
// ----------------------------------------------------------------------

/// Finds chapters and the factions named in the transcript
pub struct DetectStage {
    rules: Arc<dyn RulesDatabase>,
}

impl DetectStage {
    pub fn new(rules: Arc<dyn RulesDatabase>) -> Self {
        Self { rules }
    }
}

/// One chapter per paragraph, with byte ranges into `text`
pub fn detect_chapters(text: &str) -> Vec<Chapter> {
    let mut chapters = Vec::new();
    let mut offset = 0;

    for paragraph in text.split("\n\n") {
        let start = offset;
        let end = start + paragraph.len();
        offset = end + 2;

        if paragraph.trim().is_empty() {
            continue;
        }
        chapters.push(Chapter {
            index: chapters.len(),
            start,
            end,
            heading: phase_heading(paragraph),
        });
    }

    chapters
}

/// Position of the first whole-word occurrence of `name` in normalized text
fn first_mention(normalized_text: &str, name: &str) -> Option<usize> {
    let needle = normalize(name);
    if needle.is_empty() {
        return None;
    }
    format!(" {} ", normalized_text).find(&format!(" {} ", needle))
}

#[async_trait]
impl Stage for DetectStage {
    fn kind(&self) -> StageKind {
        StageKind::Detection
    }

    async fn run(&self, input: StageOutput) -> Result<StageOutput, PipelineError> {
        let transcript = match input {
            StageOutput::Preprocessed(transcript) => transcript,
            other => return Err(unexpected(self.kind(), &other)),
        };

        let chapters = detect_chapters(&transcript.text);

        let normalized = normalize(&transcript.text);
        let known = self.rules.candidates(EntityType::Faction, None).await?;

        let mut mentioned: Vec<(usize, String)> = known
            .iter()
            .filter_map(|faction| first_mention(&normalized, &faction.name).map(|pos| (pos, faction.name.clone())))
            .collect();
        mentioned.sort();
        let mut factions: Vec<String> = mentioned.into_iter().map(|(_, name)| name).collect();

        // Factions hinted by metadata but never spoken still count
        for hint in transcript.player_hints.iter().filter_map(|p| p.faction.as_deref()) {
            let key = normalize(hint);
            if let Some(faction) = known.iter().find(|f| normalize(&f.name) == key) {
                if !factions.contains(&faction.name) {
                    factions.push(faction.name.clone());
                }
            }
        }

        let player_names = transcript.player_hints.iter().map(|p| p.name.clone()).collect();

        debug!(chapters = chapters.len(), ?factions, "Detection complete");

        Ok(StageOutput::Detected(Detection {
            transcript,
            chapters,
            factions,
            player_names,
        }))
    }
}

// ----------------------------------------------------------------------
// Extraction
// ----------------------------------------------------------------------

/// Produces the draft report through the extraction invoker
pub struct ExtractStage {
    invoker: ExtractionInvoker,
}

impl ExtractStage {
    pub fn new(invoker: ExtractionInvoker) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn kind(&self) -> StageKind {
        StageKind::Extraction
    }

    async fn run(&self, input: StageOutput) -> Result<StageOutput, PipelineError> {
        let detection = match input {
            StageOutput::Detected(detection) => detection,
            other => return Err(unexpected(self.kind(), &other)),
        };

        let (draft, attempts) = self.invoker.extract(&detection).await?;

        Ok(StageOutput::Extracted(Extraction {
            detection,
            draft,
            attempts,
        }))
    }
}

// ----------------------------------------------------------------------
// Resolution
// ----------------------------------------------------------------------

/// Resolves the draft against canonical entities
pub struct ResolveStage {
    resolver: EntityResolver,
}

impl ResolveStage {
    pub fn new(resolver: EntityResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Stage for ResolveStage {
    fn kind(&self) -> StageKind {
        StageKind::Resolution
    }

    async fn run(&self, input: StageOutput) -> Result<StageOutput, PipelineError> {
        let extraction = match input {
            StageOutput::Extracted(extraction) => extraction,
            other => return Err(unexpected(self.kind(), &other)),
        };

        let transcript = &extraction.detection.transcript;
        let output = self
            .resolver
            .resolve_report(&transcript.video_id, &extraction.draft, &transcript.text)
            .await?;

        output
            .report
            .validate()
            .map_err(|message| PipelineError::ExtractionSchema {
                message,
                attempts: extraction.attempts,
            })?;

        Ok(StageOutput::Resolved(output))
    }
}
