//! Command-line interface for warscribe.
//!
//! Provides commands for running the pipeline on a video, reviewing
//! suggestions and feedback, teaching aliases and managing the cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::{DirectoryTranscripts, HttpExtractor, JsonRulesDatabase};
use crate::config::{self, ResolvedConfig};
use crate::domain::{BattleReport, EntityType, FeedbackItem, ResolutionStatus};
use crate::service::{PipelineSettings, ReportService};
use crate::store::{AliasStore, ExtractionCache};

/// warscribe - Battle report extraction from wargame video transcripts
#[derive(Parser, Debug)]
#[command(name = "warscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract and resolve the battle report for a video
    Run {
        /// Video ID (looks for <transcripts>/<id>.txt)
        video_id: String,

        /// Ignore cached data and run every stage again
        #[arg(short, long)]
        force: bool,
    },

    /// Accept the suggested match for an unvalidated entry
    Accept {
        /// Video ID
        video_id: String,

        /// Index of the unit (or stratagem with --stratagem)
        index: usize,

        /// Address the stratagem list instead of the unit list
        #[arg(long)]
        stratagem: bool,
    },

    /// Review low-confidence resolutions
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommands,
    },

    /// Manage user-taught aliases
    Alias {
        #[command(subcommand)]
        command: AliasCommands,
    },

    /// Manage cached transcripts and reports
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum FeedbackCommands {
    /// List pending feedback items
    List {
        /// Only items raised for this video
        #[arg(long)]
        video: Option<String>,
    },

    /// Resolve an item to a canonical name and learn the alias
    Resolve {
        /// Feedback ID
        feedback_id: String,

        /// Canonical name from the rules database
        canonical: String,
    },

    /// Close an item without teaching anything
    Ignore {
        /// Feedback ID
        feedback_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Map colloquial text to a canonical name
    Teach {
        /// Text as players say it (e.g. "big mek")
        alias: String,

        /// Canonical name from the rules database
        canonical: String,

        /// Kind of entity the alias names
        #[arg(short = 't', long, value_enum, default_value = "unit")]
        entity_type: EntityKind,

        /// Only apply the alias within this faction
        #[arg(long)]
        faction: Option<String>,
    },

    /// List taught aliases
    List,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Drop cached data
    Clear {
        /// Only this video (clears everything if omitted)
        #[arg(long)]
        video: Option<String>,
    },
}

/// Entity type for CLI input
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EntityKind {
    Unit,
    Stratagem,
    Faction,
    Detachment,
}

impl From<EntityKind> for EntityType {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Unit => EntityType::Unit,
            EntityKind::Stratagem => EntityType::Stratagem,
            EntityKind::Faction => EntityType::Faction,
            EntityKind::Detachment => EntityType::Detachment,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Config => show_config(),
            command => {
                let service = build_service(config::config()?)?;
                execute_with(&service, command).await
            }
        }
    }
}

async fn execute_with(service: &ReportService, command: Commands) -> Result<()> {
    match command {
        Commands::Run { video_id, force } => run_pipeline(service, &video_id, force).await,
        Commands::Accept {
            video_id,
            index,
            stratagem,
        } => {
            let report = if stratagem {
                service.accept_stratagem_suggestion(&video_id, index).await?
            } else {
                service.accept_suggestion(&video_id, index).await?
            };
            print_report(&report)
        }
        Commands::Feedback { command } => execute_feedback(service, command).await,
        Commands::Alias { command } => execute_alias(service, command).await,
        Commands::Cache {
            command: CacheCommands::Clear { video },
        } => {
            let removed = service.clear_cache(video.as_deref()).await?;
            println!("Removed {} cached entries", removed);
            Ok(())
        }
        Commands::Config => show_config(),
    }
}

/// Wire the service to its on-disk stores and configured collaborators
fn build_service(cfg: &ResolvedConfig) -> Result<ReportService> {
    std::fs::create_dir_all(&cfg.home)
        .with_context(|| format!("Failed to create home directory: {}", cfg.home.display()))?;

    let rules = JsonRulesDatabase::load(&cfg.rules)?;
    let source = DirectoryTranscripts::new(&cfg.transcripts);
    let extractor = HttpExtractor::new(
        &cfg.extraction.endpoint,
        &cfg.extraction.model,
        cfg.extraction.api_key.clone(),
        Duration::from_secs(cfg.extraction.timeout_seconds),
    )?;
    let aliases = AliasStore::open(cfg.alias_db())
        .with_context(|| format!("Failed to open alias store: {}", cfg.alias_db().display()))?;
    let cache = ExtractionCache::open(cfg.cache_db())
        .with_context(|| format!("Failed to open cache: {}", cfg.cache_db().display()))?;

    Ok(ReportService::new(
        Arc::new(source),
        Arc::new(rules),
        Arc::new(extractor),
        aliases,
        cache,
        PipelineSettings {
            resolution: cfg.resolution.clone(),
            max_transcript_bytes: cfg.limits.max_transcript_bytes,
        },
    ))
}

/// Run the pipeline and print the report, or the failing stage's artifacts
async fn run_pipeline(service: &ReportService, video_id: &str, force: bool) -> Result<()> {
    let run = service.run_pipeline(video_id, force).await?;

    if let Some((stage, error)) = run.failure() {
        eprintln!("\n[Run {} failed at {}: {}]", run.id, stage, error);
        eprintln!("Completed stages:");
        for artifact in run.artifacts.iter().filter(|a| a.is_completed()) {
            eprintln!("  {} ({}ms)", artifact.stage, artifact.duration_ms);
        }
        println!("{}", serde_json::to_string_pretty(&run.artifacts)?);
        std::process::exit(1);
    }

    let cached = run.from_cache;
    let report = run.into_result()?;
    print_report(&report)?;

    if cached {
        eprintln!("\n[Served from cache; use --force to re-run]");
    }
    let review = report.needs_review();
    if !review.is_empty() {
        eprintln!("\n[{} entries need review]", review.len());
    }

    Ok(())
}

fn print_report(report: &BattleReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);

    let unvalidated = report
        .units
        .iter()
        .enumerate()
        .filter(|(_, u)| u.status == ResolutionStatus::Unvalidated);
    for (index, unit) in unvalidated {
        match &unit.suggested_match {
            Some(suggestion) => eprintln!(
                "  unit {}: '{}' -> '{}'? ({:.2})",
                index, unit.name, suggestion.name, suggestion.score
            ),
            None => eprintln!("  unit {}: '{}' unmatched", index, unit.name),
        }
    }

    Ok(())
}

async fn execute_feedback(service: &ReportService, command: FeedbackCommands) -> Result<()> {
    match command {
        FeedbackCommands::List { video } => {
            let items = service.list_feedback(video.as_deref()).await?;
            if items.is_empty() {
                println!("No pending feedback");
                return Ok(());
            }

            println!("{:<20} {:<11} {:<28} {:<28}", "ID", "TYPE", "TOKEN", "TOP SUGGESTION");
            println!("{}", "-".repeat(90));
            for item in &items {
                print_feedback_row(item);
            }
            Ok(())
        }
        FeedbackCommands::Resolve {
            feedback_id,
            canonical,
        } => {
            let item = service.submit_feedback(&feedback_id, &canonical).await?;
            println!(
                "Resolved '{}' -> '{}'",
                item.raw_token,
                item.resolved_to.as_deref().unwrap_or(&canonical)
            );
            Ok(())
        }
        FeedbackCommands::Ignore { feedback_id } => {
            let item = service.ignore_feedback(&feedback_id).await?;
            println!("Ignored '{}'", item.raw_token);
            Ok(())
        }
    }
}

fn print_feedback_row(item: &FeedbackItem) {
    let suggestion = item
        .suggestions
        .first()
        .map(|(name, score)| format!("{} ({:.2})", name, score))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<20} {:<11} {:<28} {:<28}",
        item.id,
        item.entity_type,
        truncate(&item.raw_token, 27),
        suggestion
    );
}

async fn execute_alias(service: &ReportService, command: AliasCommands) -> Result<()> {
    match command {
        AliasCommands::Teach {
            alias,
            canonical,
            entity_type,
            faction,
        } => {
            let mapping = service
                .teach_alias(&alias, &canonical, entity_type.into(), faction.as_deref())
                .await?;
            println!(
                "'{}' -> '{}' ({}{})",
                mapping.alias,
                mapping.canonical_name,
                mapping.entity_type,
                mapping
                    .faction_scope
                    .as_deref()
                    .map(|f| format!(", {}", f))
                    .unwrap_or_default()
            );
            Ok(())
        }
        AliasCommands::List => {
            let mappings = service.list_mappings().await?;
            if mappings.is_empty() {
                println!("No aliases taught yet");
                return Ok(());
            }

            println!("{:<24} {:<28} {:<11} {:<16} {:>5}", "ALIAS", "CANONICAL", "TYPE", "FACTION", "USES");
            println!("{}", "-".repeat(88));
            for m in &mappings {
                println!(
                    "{:<24} {:<28} {:<11} {:<16} {:>5}",
                    truncate(&m.alias, 23),
                    truncate(&m.canonical_name, 27),
                    m.entity_type,
                    m.faction_scope.as_deref().unwrap_or("-"),
                    m.usage_count
                );
            }
            Ok(())
        }
    }
}

/// Show current configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("warscribe configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:        {}", cfg.home.display());
    println!("  Rules:       {}", cfg.rules.display());
    println!("  Transcripts: {}", cfg.transcripts.display());
    println!("  Aliases:     {}", cfg.alias_db().display());
    println!("  Cache:       {}", cfg.cache_db().display());
    println!();
    println!("Resolution:");
    println!("  High threshold:   {}", cfg.resolution.high_threshold);
    println!("  Medium threshold: {}", cfg.resolution.medium_threshold);
    println!("  Workers:          {}", cfg.resolution.worker_limit);
    println!("  Max suggestions:  {}", cfg.resolution.max_suggestions);
    println!();
    println!("Extraction:");
    println!("  Endpoint: {}", cfg.extraction.endpoint);
    println!("  Model:    {}", cfg.extraction.model);
    println!("  API key:  {}", if cfg.extraction.api_key.is_some() { "set" } else { "(not set)" });
    println!("  Timeout:  {}s", cfg.extraction.timeout_seconds);
    println!();
    println!("Limits:");
    println!("  Max transcript size: {} bytes", cfg.limits.max_transcript_bytes);

    Ok(())
}

/// Truncate to a character count, marking the cut
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
