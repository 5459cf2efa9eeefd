//! Structured extraction.
//!
//! Sends the cleaned transcript to the generative extractor with a fixed
//! output schema, then validates the reply against a static contract type.
//! A reply that fails validation gets exactly one repair attempt, with the
//! validation error appended to the prompt. Transport failures are returned
//! immediately.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::{GenerationOutcome, GenerativeExtractor};
use crate::domain::{Confidence, Detection, DraftReport, Player, StratagemMention, UnitMention};
use crate::error::PipelineError;

/// One initial attempt plus one repair
const MAX_ATTEMPTS: u32 = 2;

/// Why an extractor reply was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .issues.join("; "))]
pub struct SchemaViolation {
    pub issues: Vec<String>,
}

impl SchemaViolation {
    fn new(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

/// Wire shape of an extraction reply
#[derive(Debug, Deserialize)]
struct ExtractionContract {
    players: Vec<PlayerContract>,
    #[serde(default)]
    units: Vec<UnitContract>,
    #[serde(default)]
    stratagems: Vec<StratagemContract>,
    #[serde(default)]
    mission: Option<String>,
    #[serde(default)]
    points_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PlayerContract {
    name: String,
    faction: String,
    #[serde(default)]
    detachment: Option<String>,
    #[serde(default)]
    confidence: Confidence,
}

#[derive(Debug, Deserialize)]
struct UnitContract {
    name: String,
    player_index: usize,
    #[serde(default)]
    points: Option<u32>,
    #[serde(default)]
    confidence: Confidence,
}

#[derive(Debug, Deserialize)]
struct StratagemContract {
    name: String,
    #[serde(default)]
    player_index: Option<usize>,
    #[serde(default)]
    confidence: Confidence,
}

/// JSON schema sent to the extractor
pub fn output_schema() -> Value {
    let confidence = json!({ "type": "string", "enum": ["high", "medium", "low"] });
    json!({
        "type": "object",
        "required": ["players", "units", "stratagems"],
        "properties": {
            "players": {
                "type": "array",
                "minItems": 1,
                "maxItems": 2,
                "items": {
                    "type": "object",
                    "required": ["name", "faction", "confidence"],
                    "properties": {
                        "name": { "type": "string" },
                        "faction": { "type": "string" },
                        "detachment": { "type": ["string", "null"] },
                        "confidence": confidence
                    }
                }
            },
            "units": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "player_index", "confidence"],
                    "properties": {
                        "name": { "type": "string" },
                        "player_index": { "type": "integer", "enum": [0, 1] },
                        "points": { "type": ["integer", "null"], "minimum": 0 },
                        "confidence": confidence
                    }
                }
            },
            "stratagems": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "confidence"],
                    "properties": {
                        "name": { "type": "string" },
                        "player_index": { "type": ["integer", "null"], "enum": [0, 1, null] },
                        "confidence": confidence
                    }
                }
            },
            "mission": { "type": ["string", "null"] },
            "points_limit": { "type": ["integer", "null"], "minimum": 0 }
        }
    })
}

/// Validate an extractor reply and convert it to a draft report
pub fn validate_extraction(value: &Value) -> Result<DraftReport, SchemaViolation> {
    let contract: ExtractionContract = serde_json::from_value(value.clone())
        .map_err(|e| SchemaViolation::new(format!("reply does not match the schema: {}", e)))?;

    let mut issues = Vec::new();

    let player_count = contract.players.len();
    if player_count == 0 || player_count > 2 {
        issues.push(format!("expected 1 or 2 players, found {}", player_count));
    }
    for (i, player) in contract.players.iter().enumerate() {
        if player.name.trim().is_empty() {
            issues.push(format!("players[{}].name is empty", i));
        }
        if player.faction.trim().is_empty() {
            issues.push(format!("players[{}].faction is empty", i));
        }
    }
    for (i, unit) in contract.units.iter().enumerate() {
        if unit.name.trim().is_empty() {
            issues.push(format!("units[{}].name is empty", i));
        }
        if unit.player_index >= player_count.max(1) {
            issues.push(format!(
                "units[{}].player_index {} is out of range for {} players",
                i, unit.player_index, player_count
            ));
        }
    }
    for (i, strat) in contract.stratagems.iter().enumerate() {
        if strat.name.trim().is_empty() {
            issues.push(format!("stratagems[{}].name is empty", i));
        }
        if let Some(index) = strat.player_index.filter(|&index| index >= player_count.max(1)) {
            issues.push(format!(
                "stratagems[{}].player_index {} is out of range for {} players",
                i, index, player_count
            ));
        }
    }

    if !issues.is_empty() {
        return Err(SchemaViolation { issues });
    }

    Ok(DraftReport {
        players: contract
            .players
            .into_iter()
            .map(|p| Player {
                name: p.name.trim().to_string(),
                faction: p.faction.trim().to_string(),
                detachment: p.detachment.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
                confidence: p.confidence,
            })
            .collect(),
        units: contract
            .units
            .into_iter()
            .map(|u| UnitMention {
                name: u.name.trim().to_string(),
                player_index: u.player_index,
                points: u.points,
                confidence: u.confidence,
            })
            .collect(),
        stratagems: contract
            .stratagems
            .into_iter()
            .map(|s| StratagemMention {
                name: s.name.trim().to_string(),
                player_index: s.player_index,
                confidence: s.confidence,
            })
            .collect(),
        mission: contract.mission.filter(|m| !m.trim().is_empty()),
        points_limit: contract.points_limit,
    })
}

/// Build the extraction prompt, including detection hints
pub fn build_prompt(text: &str, detection: &Detection) -> String {
    let mut prompt = String::from(
        "Extract the battle report from the transcript below.\n\
         List the one or two players with their faction and detachment, every unit \
         fielded with the index of the player who owns it (0 or 1) and its points \
         cost if stated, and every stratagem used. Include the mission and the \
         points limit when they are mentioned.\n",
    );

    if !detection.player_names.is_empty() {
        prompt.push_str(&format!("\nKnown players: {}\n", detection.player_names.join(", ")));
    }
    if !detection.factions.is_empty() {
        prompt.push_str(&format!("Factions mentioned: {}\n", detection.factions.join(", ")));
    }

    prompt.push_str("\nTranscript:\n");
    prompt.push_str(text);
    prompt
}

fn repair_prompt(prompt: &str, violation: &str) -> String {
    format!(
        "{}\n\nYour previous reply was rejected: {}\n\
         Reply again with a single JSON object that satisfies the schema.",
        prompt, violation
    )
}

/// Invokes the generative extractor with validate-repair-fail semantics
#[derive(Clone)]
pub struct ExtractionInvoker {
    extractor: Arc<dyn GenerativeExtractor>,
}

impl ExtractionInvoker {
    pub fn new(extractor: Arc<dyn GenerativeExtractor>) -> Self {
        Self { extractor }
    }

    /// Extract a draft report. Returns the draft and the number of attempts used.
    pub async fn extract(&self, detection: &Detection) -> Result<(DraftReport, u32), PipelineError> {
        let schema = output_schema();
        let base_prompt = build_prompt(&detection.transcript.text, detection);
        let mut prompt = base_prompt.clone();
        let mut last_violation = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = self
                .extractor
                .generate(&prompt, &schema)
                .await
                .map_err(|e| PipelineError::ExtractionTransport { message: e.0 })?;

            let checked = match outcome {
                GenerationOutcome::Parsed(value) => validate_extraction(&value).map_err(|v| v.to_string()),
                GenerationOutcome::SchemaViolation(message) => Err(message),
            };

            match checked {
                Ok(draft) => {
                    info!(
                        extractor = self.extractor.name(),
                        attempt,
                        players = draft.players.len(),
                        units = draft.units.len(),
                        "Extraction validated"
                    );
                    return Ok((draft, attempt));
                }
                Err(violation) => {
                    warn!(attempt, %violation, "Extraction reply rejected");
                    prompt = repair_prompt(&base_prompt, &violation);
                    last_violation = violation;
                }
            }
        }

        Err(PipelineError::ExtractionSchema {
            message: last_violation,
            attempts: MAX_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_reply() -> Value {
        json!({
            "players": [
                { "name": "Alice", "faction": "Space Marines", "confidence": "high" },
                { "name": "Bob", "faction": "Orks", "detachment": "War Horde", "confidence": "medium" }
            ],
            "units": [
                { "name": "Intercessors", "player_index": 0, "points": 90, "confidence": "high" },
                { "name": "Boyz", "player_index": 1, "confidence": "low" }
            ],
            "stratagems": [{ "name": "Command Re-roll", "player_index": null, "confidence": "high" }],
            "mission": "Take and Hold",
            "points_limit": 2000
        })
    }

    #[test]
    fn test_validate_accepts_well_formed_reply() {
        let draft = validate_extraction(&valid_reply()).unwrap();
        assert_eq!(draft.players.len(), 2);
        assert_eq!(draft.players[1].detachment.as_deref(), Some("War Horde"));
        assert_eq!(draft.units[0].points, Some(90));
        assert_eq!(draft.units[1].confidence, Confidence::Low);
        assert_eq!(draft.stratagems[0].player_index, None);
        assert_eq!(draft.points_limit, Some(2000));
    }

    #[test]
    fn test_validate_rejects_three_players() {
        let mut reply = valid_reply();
        reply["players"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "name": "Carol", "faction": "Necrons", "confidence": "high" }));

        let err = validate_extraction(&reply).unwrap_err();
        assert!(err.to_string().contains("expected 1 or 2 players"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mut reply = valid_reply();
        reply["players"].as_array_mut().unwrap().pop();

        let err = validate_extraction(&reply).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.issues[0].starts_with("units[1]"));
    }

    #[test]
    fn test_validate_rejects_missing_players() {
        let err = validate_extraction(&json!({ "units": [] })).unwrap_err();
        assert!(err.to_string().contains("does not match the schema"));
    }

    #[test]
    fn test_repair_prompt_carries_violation() {
        let prompt = repair_prompt("base", "expected 1 or 2 players, found 3");
        assert!(prompt.starts_with("base"));
        assert!(prompt.contains("expected 1 or 2 players, found 3"));
    }
}
