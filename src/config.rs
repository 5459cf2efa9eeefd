//! Configuration for warscribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (WARSCRIBE_HOME, WARSCRIBE_RULES,
//!    WARSCRIBE_TRANSCRIPTS, WARSCRIBE_EXTRACTOR_URL, WARSCRIBE_API_KEY)
//! 2. Config file (.warscribe/config.yaml)
//! 3. Defaults (~/.warscribe)
//!
//! Config file discovery:
//! - Searches current directory and parents for .warscribe/config.yaml
//! - `home` is relative to the .warscribe/ directory, other paths to the
//!   project root (the parent of .warscribe/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::ResolverSettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub resolution: Option<ResolutionConfig>,
    #[serde(default)]
    pub extraction: Option<ExtractionConfig>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory holding the databases (relative to .warscribe/)
    pub home: Option<String>,
    /// Rules database JSON file (relative to the project root)
    pub rules: Option<String>,
    /// Transcript directory (relative to the project root)
    pub transcripts: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionConfig {
    pub high_threshold: Option<f64>,
    pub medium_threshold: Option<f64>,
    pub worker_limit: Option<usize>,
    pub max_suggestions: Option<usize>,
    pub context_words: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_transcript_bytes: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to warscribe home (databases)
    pub home: PathBuf,
    /// Rules database file
    pub rules: PathBuf,
    /// Transcript directory
    pub transcripts: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub resolution: ResolverSettings,
    pub extraction: ExtractionSettings,
    pub limits: LimitSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitSettings {
    pub max_transcript_bytes: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_transcript_bytes: 2_097_152, // 2MB
        }
    }
}

impl ResolvedConfig {
    /// Alias and feedback database
    pub fn alias_db(&self) -> PathBuf {
        self.home.join("aliases.db")
    }

    /// Extraction cache database
    pub fn cache_db(&self) -> PathBuf {
        self.home.join("cache.db")
    }
}

/// Find config file by searching a directory and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".warscribe").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge file overrides onto the default resolver settings and check them
fn resolution_settings(config: Option<&ResolutionConfig>) -> Result<ResolverSettings> {
    let defaults = ResolverSettings::default();
    let settings = match config {
        Some(c) => ResolverSettings {
            high_threshold: c.high_threshold.unwrap_or(defaults.high_threshold),
            medium_threshold: c.medium_threshold.unwrap_or(defaults.medium_threshold),
            worker_limit: c.worker_limit.unwrap_or(defaults.worker_limit),
            max_suggestions: c.max_suggestions.unwrap_or(defaults.max_suggestions),
            context_words: c.context_words.unwrap_or(defaults.context_words),
        },
        None => defaults,
    };

    if !(0.0 < settings.medium_threshold
        && settings.medium_threshold < settings.high_threshold
        && settings.high_threshold <= 1.0)
    {
        anyhow::bail!(
            "Invalid resolution thresholds: need 0 < medium ({}) < high ({}) <= 1",
            settings.medium_threshold,
            settings.high_threshold
        );
    }
    if settings.worker_limit == 0 {
        anyhow::bail!("resolution.worker_limit must be at least 1");
    }
    if settings.max_suggestions == 0 {
        anyhow::bail!("resolution.max_suggestions must be at least 1");
    }

    Ok(settings)
}

/// Resolve configuration from an optional config file and an env lookup
fn resolve_config(
    config_file: Option<PathBuf>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    // .warscribe/ and the project root above it
    let (config_dir, base_dir) = match config_file {
        Some(ref path) => {
            let config_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            let base_dir = config_dir.parent().unwrap_or(Path::new(".")).to_path_buf();
            (config_dir, base_dir)
        }
        None => (PathBuf::from("."), PathBuf::from(".")),
    };
    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

    let home = if let Some(env_home) = env("WARSCRIBE_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = paths.home {
        resolve_path(&config_dir, home_path)
    } else {
        default_home
    };

    let rules = if let Some(env_rules) = env("WARSCRIBE_RULES") {
        PathBuf::from(env_rules)
    } else if let Some(ref rules_path) = paths.rules {
        resolve_path(&base_dir, rules_path)
    } else {
        home.join("rules.json")
    };

    let transcripts = if let Some(env_dir) = env("WARSCRIBE_TRANSCRIPTS") {
        PathBuf::from(env_dir)
    } else if let Some(ref dir) = paths.transcripts {
        resolve_path(&base_dir, dir)
    } else {
        home.join("transcripts")
    };

    let resolution = resolution_settings(file.as_ref().and_then(|f| f.resolution.as_ref()))?;

    let extraction_file = file.as_ref().and_then(|f| f.extraction.as_ref());
    let defaults = ExtractionSettings::default();
    let extraction = ExtractionSettings {
        endpoint: env("WARSCRIBE_EXTRACTOR_URL")
            .or_else(|| extraction_file.and_then(|e| e.endpoint.clone()))
            .unwrap_or(defaults.endpoint),
        model: extraction_file
            .and_then(|e| e.model.clone())
            .unwrap_or(defaults.model),
        api_key: env("WARSCRIBE_API_KEY"),
        timeout_seconds: extraction_file
            .and_then(|e| e.timeout_seconds)
            .unwrap_or(defaults.timeout_seconds),
    };

    let limits = LimitSettings {
        max_transcript_bytes: file
            .as_ref()
            .and_then(|f| f.limits.as_ref())
            .and_then(|l| l.max_transcript_bytes)
            .unwrap_or_else(|| LimitSettings::default().max_transcript_bytes),
    };

    Ok(ResolvedConfig {
        home,
        rules,
        transcripts,
        config_file,
        resolution,
        extraction,
        limits,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".warscribe");

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let config_file = find_config_file(&cwd);

    resolve_config(config_file, default_home, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(root: &Path, body: &str) -> PathBuf {
        let dir = root.join(".warscribe");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(None, PathBuf::from("/home/u/.warscribe"), no_env).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/u/.warscribe"));
        assert_eq!(config.rules, PathBuf::from("/home/u/.warscribe/rules.json"));
        assert_eq!(config.transcripts, PathBuf::from("/home/u/.warscribe/transcripts"));
        assert_eq!(config.alias_db(), PathBuf::from("/home/u/.warscribe/aliases.db"));
        assert_eq!(config.resolution, ResolverSettings::default());
        assert_eq!(config.extraction, ExtractionSettings::default());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
version: "1.0"
paths:
  home: /var/lib/warscribe
  rules: data/rules.json
resolution:
  high_threshold: 0.9
  worker_limit: 8
extraction:
  model: local-model
  timeout_seconds: 30
limits:
  max_transcript_bytes: 1024
"#,
        );

        let config = resolve_config(Some(path.clone()), PathBuf::from("/unused"), no_env).unwrap();

        assert_eq!(config.home, PathBuf::from("/var/lib/warscribe"));
        assert_eq!(config.rules, temp.path().join("data/rules.json"));
        assert_eq!(config.transcripts, PathBuf::from("/var/lib/warscribe/transcripts"));
        assert_eq!(config.resolution.high_threshold, 0.9);
        assert_eq!(config.resolution.medium_threshold, 0.55);
        assert_eq!(config.resolution.worker_limit, 8);
        assert_eq!(config.extraction.model, "local-model");
        assert_eq!(config.extraction.timeout_seconds, 30);
        assert_eq!(config.limits.max_transcript_bytes, 1024);
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            "version: \"1.0\"\npaths:\n  home: /from/file\nextraction:\n  endpoint: http://file/v1\n",
        );
        let env: HashMap<&str, &str> = [
            ("WARSCRIBE_HOME", "/from/env"),
            ("WARSCRIBE_EXTRACTOR_URL", "http://env/v1"),
            ("WARSCRIBE_API_KEY", "secret"),
        ]
        .into_iter()
        .collect();

        let config = resolve_config(Some(path), PathBuf::from("/unused"), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/from/env"));
        assert_eq!(config.extraction.endpoint, "http://env/v1");
        assert_eq!(config.extraction.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            "version: \"1.0\"\nresolution:\n  high_threshold: 0.5\n  medium_threshold: 0.7\n",
        );

        let err = resolve_config(Some(path), PathBuf::from("/unused"), no_env).unwrap_err();
        assert!(err.to_string().contains("Invalid resolution thresholds"));
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "version: \"1.0\"");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "../sibling"),
            PathBuf::from("/home/user/project/../sibling")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
