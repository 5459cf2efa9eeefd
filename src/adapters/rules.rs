//! JSON-file rules database.
//!
//! File layout:
//!
//! ```json
//! {
//!   "factions":    [{ "name": "Orks" }],
//!   "detachments": [{ "name": "War Horde", "faction": "Orks" }],
//!   "units":       [{ "name": "Boyz", "faction": "Orks",
//!                     "stats": { "T": "5" }, "keywords": ["Infantry"] }],
//!   "stratagems":  [{ "name": "Command Re-roll" }]
//! }
//! ```
//!
//! Entities without a faction are visible from every faction scope.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::core::similarity::normalize;
use crate::domain::{CanonicalEntity, EntityType, UnitStats};
use crate::error::PipelineError;

use super::RulesDatabase;

#[derive(Debug, Default, Deserialize)]
struct RulesFile {
    #[serde(default)]
    factions: Vec<EntityRecord>,
    #[serde(default)]
    detachments: Vec<EntityRecord>,
    #[serde(default)]
    units: Vec<EntityRecord>,
    #[serde(default)]
    stratagems: Vec<EntityRecord>,
}

#[derive(Debug, Deserialize)]
struct EntityRecord {
    name: String,
    #[serde(default)]
    faction: Option<String>,
    #[serde(default)]
    stats: Option<UnitStats>,
    #[serde(default)]
    keywords: Vec<String>,
}

impl EntityRecord {
    fn into_entity(self, entity_type: EntityType) -> CanonicalEntity {
        let mut entity = CanonicalEntity::new(entity_type, self.name, self.faction.as_deref())
            .with_keywords(self.keywords);
        entity.stats = self.stats;
        entity
    }
}

/// In-memory rules database loaded from a JSON file
#[derive(Debug, Clone, Default)]
pub struct JsonRulesDatabase {
    entities: HashMap<EntityType, Vec<CanonicalEntity>>,
}

impl JsonRulesDatabase {
    /// Load the database from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules database: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse rules database: {}", path.display()))
    }

    /// Parse the database from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let file: RulesFile = serde_json::from_str(content)?;

        let sections = [
            (EntityType::Faction, file.factions),
            (EntityType::Detachment, file.detachments),
            (EntityType::Unit, file.units),
            (EntityType::Stratagem, file.stratagems),
        ];
        let entities = sections
            .into_iter()
            .flat_map(|(entity_type, records)| records.into_iter().map(move |r| r.into_entity(entity_type)));

        Ok(Self::from_entities(entities))
    }

    /// Build a database from already-constructed entities
    pub fn from_entities(entities: impl IntoIterator<Item = CanonicalEntity>) -> Self {
        let mut db = Self::default();
        for entity in entities {
            db.entities.entry(entity.entity_type).or_default().push(entity);
        }
        db
    }

    fn visible<'a>(
        &'a self,
        entity_type: EntityType,
        faction: Option<&str>,
    ) -> impl Iterator<Item = &'a CanonicalEntity> + 'a {
        // Factions are never themselves faction-scoped
        let scope = match entity_type {
            EntityType::Faction => None,
            _ => faction.map(normalize).filter(|s| !s.is_empty()),
        };

        self.entities
            .get(&entity_type)
            .into_iter()
            .flatten()
            .filter(move |entity| match (&scope, &entity.faction) {
                (None, _) | (Some(_), None) => true,
                (Some(scope), Some(owner)) => normalize(owner) == *scope,
            })
    }
}

#[async_trait]
impl RulesDatabase for JsonRulesDatabase {
    async fn candidates(
        &self,
        entity_type: EntityType,
        faction: Option<&str>,
    ) -> Result<Vec<CanonicalEntity>, PipelineError> {
        Ok(self.visible(entity_type, faction).cloned().collect())
    }

    async fn find(
        &self,
        entity_type: EntityType,
        name: &str,
        faction: Option<&str>,
    ) -> Result<Option<CanonicalEntity>, PipelineError> {
        let key = normalize(name);
        if key.is_empty() {
            return Ok(None);
        }
        let slug = crate::domain::rules::slugify(name);

        Ok(self
            .visible(entity_type, faction)
            .find(|entity| normalize(&entity.name) == key || entity.slug == slug)
            .cloned())
    }
}
