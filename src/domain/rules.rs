//! Canonical entities served by the rules database collaborator.

use serde::{Deserialize, Serialize};

use super::feedback::EntityType;
use super::report::UnitStats;

/// An authoritative unit, stratagem, faction or detachment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub slug: String,

    /// Owning faction (None for factions themselves and global entries)
    #[serde(default)]
    pub faction: Option<String>,

    #[serde(default)]
    pub stats: Option<UnitStats>,

    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CanonicalEntity {
    pub fn new(entity_type: EntityType, name: impl Into<String>, faction: Option<&str>) -> Self {
        let name = name.into();
        Self {
            entity_type,
            slug: slugify(&name),
            name,
            faction: faction.map(str::to_string),
            stats: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_stats(mut self, stats: UnitStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }
}

/// Lowercase, hyphen-separated form of a name ("Big Mek on Warbike" -> "big-mek-on-warbike")
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Big Mek on Warbike"), "big-mek-on-warbike");
        assert_eq!(slugify("  T'au Empire "), "t-au-empire");
        assert_eq!(slugify(""), "");
    }
}
