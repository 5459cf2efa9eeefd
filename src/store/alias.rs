//! Alias and feedback store.
//!
//! Mappings are keyed by (normalized alias, entity type, normalized faction
//! scope) with a UNIQUE index, so lookups and upserts are keyed rather than
//! scans. An unscoped mapping is stored with an empty scope key and acts as
//! the fallback for every faction.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::core::similarity::normalize;
use crate::domain::{EntityType, FeedbackItem, FeedbackStatus, UserMapping};

use super::{SqliteHandle, StoreError};

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS user_mappings (
    id TEXT PRIMARY KEY,
    alias TEXT NOT NULL,
    alias_key TEXT NOT NULL,
    canonical_name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    faction_scope TEXT,
    scope_key TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_mappings_key
    ON user_mappings (alias_key, entity_type, scope_key);
CREATE INDEX IF NOT EXISTS idx_user_mappings_canonical
    ON user_mappings (canonical_name, entity_type);
CREATE TABLE IF NOT EXISTS feedback_items (
    id TEXT PRIMARY KEY,
    video_id TEXT NOT NULL,
    raw_token TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    player_index INTEGER,
    context TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    suggestions TEXT NOT NULL,
    status TEXT NOT NULL,
    resolved_to TEXT,
    faction_scope TEXT,
    created_at TEXT NOT NULL,
    resolved_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_feedback_video_status
    ON feedback_items (video_id, status);
CREATE INDEX IF NOT EXISTS idx_feedback_status
    ON feedback_items (status);";

const MAPPING_COLUMNS: &str =
    "id, alias, canonical_name, entity_type, faction_scope, created_at, usage_count";

const FEEDBACK_COLUMNS: &str = "id, video_id, raw_token, entity_type, player_index, context, \
     confidence_score, suggestions, status, resolved_to, faction_scope, created_at, resolved_at";

/// Persistent store for user mappings and feedback items
#[derive(Clone)]
pub struct AliasStore {
    db: SqliteHandle,
}

impl AliasStore {
    /// Open (or create) the store at a file path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: SqliteHandle::open(path, SCHEMA)?,
        })
    }

    /// Create a store that lives only as long as this process
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: SqliteHandle::in_memory(SCHEMA)?,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db.path()
    }

    // ------------------------------------------------------------------
    // Mappings
    // ------------------------------------------------------------------

    /// Find the mapping for a text, preferring the faction-scoped one
    pub async fn lookup_alias(
        &self,
        text: &str,
        entity_type: EntityType,
        faction_scope: Option<&str>,
    ) -> Result<Option<UserMapping>, StoreError> {
        let alias_key = normalize(text);
        let scope_key = scope_key(faction_scope);
        self.db
            .call(move |conn| lookup(conn, &alias_key, entity_type, &scope_key))
            .await
    }

    /// Increment a mapping's usage counter, returning the new count
    pub async fn record_usage(&self, mapping_id: Uuid) -> Result<u64, StoreError> {
        self.db
            .call(move |conn| increment_usage(conn, mapping_id))
            .await
    }

    /// Look up a mapping and record its use in one serialized step
    pub async fn apply_alias(
        &self,
        text: &str,
        entity_type: EntityType,
        faction_scope: Option<&str>,
    ) -> Result<Option<UserMapping>, StoreError> {
        let alias_key = normalize(text);
        let scope_key = scope_key(faction_scope);
        self.db
            .call(move |conn| {
                let Some(mut mapping) = lookup(conn, &alias_key, entity_type, &scope_key)? else {
                    return Ok(None);
                };
                mapping.usage_count = increment_usage(conn, mapping.id)?;
                Ok(Some(mapping))
            })
            .await
    }

    /// Create or replace the mapping for (alias, entity type, faction scope).
    ///
    /// Redefining an alias to a different canonical name resets its usage
    /// counter; re-teaching the same target keeps it.
    pub async fn upsert_mapping(
        &self,
        alias: &str,
        canonical_name: &str,
        entity_type: EntityType,
        faction_scope: Option<&str>,
    ) -> Result<UserMapping, StoreError> {
        let alias = alias.trim().to_string();
        let alias_key = normalize(&alias);
        let canonical_name = canonical_name.to_string();
        let faction_scope = faction_scope.map(str::to_string);
        let scope_key = scope_key(faction_scope.as_deref());

        debug!(%alias, %canonical_name, %entity_type, "Upserting alias mapping");

        self.db
            .call(move |conn| {
                upsert(
                    conn,
                    &alias,
                    &alias_key,
                    &canonical_name,
                    entity_type,
                    faction_scope.as_deref(),
                    &scope_key,
                )
            })
            .await
    }

    /// Resolve a pending item and teach its alias in one transaction.
    ///
    /// Either both writes land or neither does, so a failed mapping write
    /// leaves the item pending and the call can be retried.
    pub async fn resolve_with_mapping(
        &self,
        id: &str,
        canonical_name: &str,
    ) -> Result<(FeedbackItem, UserMapping), StoreError> {
        let id = id.to_string();
        let canonical_name = canonical_name.to_string();

        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let item = find_feedback(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                if item.status.is_terminal() {
                    return Err(StoreError::InvalidTransition {
                        id,
                        from: item.status,
                    });
                }
                let alias = item.raw_token.trim().to_string();
                let alias_key = normalize(&alias);
                let scope_key = scope_key(item.faction_scope.as_deref());

                let mapping = upsert(
                    &tx,
                    &alias,
                    &alias_key,
                    &canonical_name,
                    item.entity_type,
                    item.faction_scope.as_deref(),
                    &scope_key,
                )?;
                let resolved = apply_transition(&tx, &id, FeedbackStatus::Resolved, Some(canonical_name.clone()))?;
                tx.commit()?;
                Ok((resolved, mapping))
            })
            .await
    }

    /// Total usage of all mappings that point at a canonical name
    pub async fn usage_for(&self, canonical_name: &str, entity_type: EntityType) -> Result<u64, StoreError> {
        let canonical_name = canonical_name.to_string();
        self.db
            .call(move |conn| {
                let total: i64 = conn.query_row(
                    "SELECT COALESCE(SUM(usage_count), 0) FROM user_mappings \
                     WHERE canonical_name = ?1 AND entity_type = ?2",
                    params![canonical_name, entity_type.as_str()],
                    |row| row.get(0),
                )?;
                Ok(total.max(0) as u64)
            })
            .await
    }

    /// All mappings, most used first
    pub async fn list_mappings(&self) -> Result<Vec<UserMapping>, StoreError> {
        self.db
            .call(|conn| {
                let sql = format!(
                    "SELECT {MAPPING_COLUMNS} FROM user_mappings ORDER BY usage_count DESC, alias_key"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], MappingRow::read)?;
                let mut mappings = Vec::new();
                for row in rows {
                    mappings.push(row?.into_mapping()?);
                }
                Ok(mappings)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    /// Insert a feedback item. Returns false if an item with the same id
    /// already exists (its status is left untouched).
    pub async fn create_feedback(&self, item: &FeedbackItem) -> Result<bool, StoreError> {
        let item = item.clone();
        let suggestions = serde_json::to_string(&item.suggestions)?;
        self.db
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO feedback_items \
                        (id, video_id, raw_token, entity_type, player_index, context, confidence_score, \
                         suggestions, status, resolved_to, faction_scope, created_at, resolved_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        item.id,
                        item.video_id,
                        item.raw_token,
                        item.entity_type.as_str(),
                        item.player_index.map(|i| i as i64),
                        item.context,
                        item.confidence_score,
                        suggestions,
                        item.status.as_str(),
                        item.resolved_to,
                        item.faction_scope,
                        item.created_at,
                        item.resolved_at,
                    ],
                )?;
                Ok(inserted == 1)
            })
            .await
    }

    pub async fn get_feedback(&self, id: &str) -> Result<Option<FeedbackItem>, StoreError> {
        let id = id.to_string();
        self.db.call(move |conn| find_feedback(conn, &id)).await
    }

    /// Transition a pending item to `resolved`
    pub async fn resolve_feedback(&self, id: &str, resolved_to: &str) -> Result<FeedbackItem, StoreError> {
        self.transition(id, FeedbackStatus::Resolved, Some(resolved_to.to_string()))
            .await
    }

    /// Transition a pending item to `ignored`
    pub async fn ignore_feedback(&self, id: &str) -> Result<FeedbackItem, StoreError> {
        self.transition(id, FeedbackStatus::Ignored, None).await
    }

    /// Pending items, oldest first, optionally for one video
    pub async fn list_pending(&self, video_id: Option<&str>) -> Result<Vec<FeedbackItem>, StoreError> {
        let video_id = video_id.map(str::to_string);
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT {FEEDBACK_COLUMNS} FROM feedback_items \
                     WHERE status = 'pending' AND (?1 IS NULL OR video_id = ?1) \
                     ORDER BY created_at, id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![video_id], FeedbackRow::read)?;
                let mut items = Vec::new();
                for row in rows {
                    items.push(row?.into_item()?);
                }
                Ok(items)
            })
            .await
    }

    async fn transition(
        &self,
        id: &str,
        to: FeedbackStatus,
        resolved_to: Option<String>,
    ) -> Result<FeedbackItem, StoreError> {
        let id = id.to_string();
        self.db
            .call(move |conn| apply_transition(conn, &id, to, resolved_to))
            .await
    }
}

fn upsert(
    conn: &Connection,
    alias: &str,
    alias_key: &str,
    canonical_name: &str,
    entity_type: EntityType,
    faction_scope: Option<&str>,
    scope_key: &str,
) -> Result<UserMapping, StoreError> {
    conn.execute(
        "INSERT INTO user_mappings \
            (id, alias, alias_key, canonical_name, entity_type, faction_scope, scope_key, created_at, usage_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0) \
         ON CONFLICT (alias_key, entity_type, scope_key) DO UPDATE SET \
            usage_count = CASE WHEN canonical_name = excluded.canonical_name \
                               THEN usage_count ELSE 0 END, \
            alias = excluded.alias, \
            canonical_name = excluded.canonical_name, \
            faction_scope = excluded.faction_scope",
        params![
            Uuid::new_v4().to_string(),
            alias,
            alias_key,
            canonical_name,
            entity_type.as_str(),
            faction_scope,
            scope_key,
            Utc::now(),
        ],
    )?;

    find_mapping(conn, alias_key, entity_type, scope_key)?
        .ok_or_else(|| StoreError::NotFound(alias_key.to_string()))
}

/// Conditional update: only pending items move, so two concurrent
/// transitions of one item cannot both succeed.
fn apply_transition(
    conn: &Connection,
    id: &str,
    to: FeedbackStatus,
    resolved_to: Option<String>,
) -> Result<FeedbackItem, StoreError> {
    let changed = conn.execute(
        "UPDATE feedback_items SET status = ?1, resolved_to = ?2, resolved_at = ?3 \
         WHERE id = ?4 AND status = 'pending'",
        params![to.as_str(), resolved_to, Utc::now(), id],
    )?;
    let item = find_feedback(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    if changed == 0 {
        return Err(StoreError::InvalidTransition {
            id: id.to_string(),
            from: item.status,
        });
    }
    Ok(item)
}

fn scope_key(faction_scope: Option<&str>) -> String {
    faction_scope.map(normalize).unwrap_or_default()
}

fn lookup(
    conn: &Connection,
    alias_key: &str,
    entity_type: EntityType,
    scope_key: &str,
) -> Result<Option<UserMapping>, StoreError> {
    if let Some(mapping) = find_mapping(conn, alias_key, entity_type, scope_key)? {
        return Ok(Some(mapping));
    }
    if !scope_key.is_empty() {
        return find_mapping(conn, alias_key, entity_type, "");
    }
    Ok(None)
}

fn find_mapping(
    conn: &Connection,
    alias_key: &str,
    entity_type: EntityType,
    scope_key: &str,
) -> Result<Option<UserMapping>, StoreError> {
    let sql = format!(
        "SELECT {MAPPING_COLUMNS} FROM user_mappings \
         WHERE alias_key = ?1 AND entity_type = ?2 AND scope_key = ?3"
    );
    conn.query_row(
        &sql,
        params![alias_key, entity_type.as_str(), scope_key],
        MappingRow::read,
    )
    .optional()?
    .map(MappingRow::into_mapping)
    .transpose()
}

fn increment_usage(conn: &Connection, mapping_id: Uuid) -> Result<u64, StoreError> {
    let id = mapping_id.to_string();
    let changed = conn.execute(
        "UPDATE user_mappings SET usage_count = usage_count + 1 WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(id));
    }
    let count: i64 = conn.query_row(
        "SELECT usage_count FROM user_mappings WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

fn find_feedback(conn: &Connection, id: &str) -> Result<Option<FeedbackItem>, StoreError> {
    let sql = format!("SELECT {FEEDBACK_COLUMNS} FROM feedback_items WHERE id = ?1");
    conn.query_row(&sql, params![id], FeedbackRow::read)
        .optional()?
        .map(FeedbackRow::into_item)
        .transpose()
}

/// Raw `user_mappings` row
struct MappingRow {
    id: String,
    alias: String,
    canonical_name: String,
    entity_type: String,
    faction_scope: Option<String>,
    created_at: DateTime<Utc>,
    usage_count: i64,
}

impl MappingRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            alias: row.get(1)?,
            canonical_name: row.get(2)?,
            entity_type: row.get(3)?,
            faction_scope: row.get(4)?,
            created_at: row.get(5)?,
            usage_count: row.get(6)?,
        })
    }

    fn into_mapping(self) -> Result<UserMapping, StoreError> {
        Ok(UserMapping {
            id: Uuid::parse_str(&self.id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            alias: self.alias,
            canonical_name: self.canonical_name,
            entity_type: self.entity_type.parse().map_err(StoreError::Corrupt)?,
            faction_scope: self.faction_scope,
            created_at: self.created_at,
            usage_count: self.usage_count.max(0) as u64,
        })
    }
}

/// Raw `feedback_items` row
struct FeedbackRow {
    id: String,
    video_id: String,
    raw_token: String,
    entity_type: String,
    player_index: Option<i64>,
    context: String,
    confidence_score: f64,
    suggestions: String,
    status: String,
    resolved_to: Option<String>,
    faction_scope: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl FeedbackRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            video_id: row.get(1)?,
            raw_token: row.get(2)?,
            entity_type: row.get(3)?,
            player_index: row.get(4)?,
            context: row.get(5)?,
            confidence_score: row.get(6)?,
            suggestions: row.get(7)?,
            status: row.get(8)?,
            resolved_to: row.get(9)?,
            faction_scope: row.get(10)?,
            created_at: row.get(11)?,
            resolved_at: row.get(12)?,
        })
    }

    fn into_item(self) -> Result<FeedbackItem, StoreError> {
        Ok(FeedbackItem {
            id: self.id,
            video_id: self.video_id,
            raw_token: self.raw_token,
            entity_type: self.entity_type.parse().map_err(StoreError::Corrupt)?,
            player_index: self.player_index.map(|i| i.max(0) as usize),
            context: self.context,
            confidence_score: self.confidence_score,
            suggestions: serde_json::from_str(&self.suggestions)?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            resolved_to: self.resolved_to,
            faction_scope: self.faction_scope,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}
