//! Extraction cache.
//!
//! Two namespaces keyed by video id: `video_data` for acquired transcripts
//! and `reports` for finished battle reports. Values are stored as JSON.
//! Entries never expire; writes are last-write-wins.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{BattleReport, VideoData};

use super::{SqliteHandle, StoreError};

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS video_data (
    video_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS reports (
    video_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    VideoData,
    Reports,
}

impl Namespace {
    fn table(&self) -> &'static str {
        match self {
            Namespace::VideoData => "video_data",
            Namespace::Reports => "reports",
        }
    }
}

/// Keyed storage for transcripts and reports
#[derive(Clone)]
pub struct ExtractionCache {
    db: SqliteHandle,
}

impl ExtractionCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: SqliteHandle::open(path, SCHEMA)?,
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: SqliteHandle::in_memory(SCHEMA)?,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db.path()
    }

    pub async fn get_report(&self, video_id: &str) -> Result<Option<BattleReport>, StoreError> {
        self.get(Namespace::Reports, video_id).await
    }

    pub async fn put_report(&self, report: &BattleReport) -> Result<(), StoreError> {
        self.put(Namespace::Reports, &report.video_id, report).await
    }

    pub async fn get_video(&self, video_id: &str) -> Result<Option<VideoData>, StoreError> {
        self.get(Namespace::VideoData, video_id).await
    }

    pub async fn put_video(&self, video: &VideoData) -> Result<(), StoreError> {
        self.put(Namespace::VideoData, &video.video_id, video).await
    }

    /// Clear one video from both namespaces, or everything when `video_id`
    /// is None. Returns the number of entries removed.
    pub async fn invalidate(&self, video_id: Option<&str>) -> Result<usize, StoreError> {
        let video_id = video_id.map(str::to_string);
        self.db
            .call(move |conn| {
                let mut removed = 0;
                for ns in [Namespace::VideoData, Namespace::Reports] {
                    removed += delete(conn, ns, video_id.as_deref())?;
                }
                Ok(removed)
            })
            .await
    }

    async fn get<T>(&self, ns: Namespace, video_id: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let video_id = video_id.to_string();
        self.db
            .call(move |conn| {
                let sql = format!("SELECT payload FROM {} WHERE video_id = ?1", ns.table());
                let payload: Option<String> = conn
                    .query_row(&sql, params![video_id], |row| row.get(0))
                    .optional()?;
                match payload {
                    Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    async fn put<T>(&self, ns: Namespace, video_id: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        let payload = serde_json::to_string(value)?;
        let video_id = video_id.to_string();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "INSERT INTO {} (video_id, payload, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (video_id) DO UPDATE SET \
                        payload = excluded.payload, updated_at = excluded.updated_at",
                    ns.table()
                );
                conn.execute(&sql, params![video_id, payload, Utc::now()])?;
                Ok(())
            })
            .await
    }
}

fn delete(conn: &Connection, ns: Namespace, video_id: Option<&str>) -> Result<usize, StoreError> {
    let removed = match video_id {
        Some(id) => conn.execute(
            &format!("DELETE FROM {} WHERE video_id = ?1", ns.table()),
            params![id],
        )?,
        None => conn.execute(&format!("DELETE FROM {}", ns.table()), [])?,
    };
    Ok(removed)
}
