//! warscribe - Battle report extraction for tabletop wargame videos
//!
//! Turns a video transcript into a structured battle report whose units,
//! stratagems and factions are matched against a rules database.
//!
//! # Architecture
//!
//! A run is an ordered list of stages, each producing an artifact:
//! - Preprocessing cleans the transcript and splits it into paragraphs
//! - Detection finds chapters and candidate factions
//! - Extraction asks a generative model for schema-shaped JSON
//! - Resolution matches every mention through exact, alias and fuzzy lookups
//!
//! Low-confidence matches become feedback items. Resolving one teaches an
//! alias that later runs apply before fuzzy scoring.
//!
//! # Modules
//!
//! - `adapters`: Transcript source, rules database and extractor integrations
//! - `core`: Similarity, resolution, extraction, stages and orchestration
//! - `domain`: Data structures (VideoData, BattleReport, FeedbackItem, PipelineRun)
//! - `store`: SQLite-backed alias store and extraction cache
//! - `service`: User-facing operations and the request/response surface
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Extract a report
//! warscribe run dQw4w9WgXcQ
//!
//! # Review low-confidence matches
//! warscribe feedback list
//! warscribe feedback resolve fb-1a2b3c4d5e6f7a8b "Big Mek on Warbike"
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod service;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::Orchestrator;
pub use domain::{BattleReport, FeedbackItem, PipelineRun, RunState, UserMapping, VideoData};
pub use error::{PipelineError, ServiceError};
pub use service::{PipelineSettings, ReportService, Request, Response};
pub use store::{AliasStore, ExtractionCache, StoreError};
