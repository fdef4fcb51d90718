// Configuration loading and parsing (pool.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use tdpool_core::matcher::{NameMatcher, DEFAULT_MATCH_THRESHOLD};
use tdpool_core::scoring::{ScoringError, ScoringRules};
use tdpool_core::standings::StandingsScope;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub pool: PoolConfig,
    pub scoring: ScoringRules,
    pub matching: MatchingConfig,
    pub db_path: String,
    pub data_paths: DataPaths,
    pub schedule: ScheduleConfig,
}

impl Config {
    /// The grading and leaderboard scope selected by `[schedule] period`.
    pub fn scope(&self) -> StandingsScope {
        match &self.schedule.period {
            Some(p) => StandingsScope::period(p.clone()),
            None => StandingsScope::Cumulative,
        }
    }

    /// The name matcher for the configured threshold.
    pub fn matcher(&self) -> Result<NameMatcher, ConfigError> {
        NameMatcher::new(self.matching.threshold).ok_or_else(|| ConfigError::ValidationError {
            field: "matching.threshold".into(),
            message: format!("must be in (0, 1], got {}", self.matching.threshold),
        })
    }
}

// ---------------------------------------------------------------------------
// pool.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire pool.toml file.
#[derive(Debug, Clone, Deserialize)]
struct PoolFile {
    pool: PoolConfig,
    scoring: ScoringRules,
    #[serde(default)]
    matching: MatchingConfig,
    database: DatabaseSection,
    data_paths: DataPaths,
    #[serde(default)]
    schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub season: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    pub threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataPaths {
    /// Play-by-play CSV for the season.
    pub plays: String,
    /// Pool picks CSV.
    pub predictions: String,
    /// Where to publish the leaderboard as JSON after each run.
    #[serde(default)]
    pub standings_json: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between checks of the play-by-play file; 0 grades once and
    /// exits.
    #[serde(default)]
    pub poll_interval_secs: u64,
    /// Restrict grading and standings to one period, e.g. `"2024-W05"`.
    #[serde(default)]
    pub period: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/pool.toml` relative to the
/// given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let pool_path = base_dir.join("config").join("pool.toml");
    let text = read_file(&pool_path)?;
    let file: PoolFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: pool_path.clone(),
        source: e,
    })?;

    let config = Config {
        pool: file.pool,
        scoring: file.scoring,
        matching: file.matching,
        db_path: file.database.path,
        data_paths: file.data_paths,
        schedule: file.schedule,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            // Keep local edits.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.pool.name.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "pool.name".into(),
            message: "must not be empty".into(),
        });
    }

    config.scoring.validate().map_err(|e| match e {
        ScoringError::InvalidRule { field, message } => ConfigError::ValidationError {
            field: format!("scoring.{field}"),
            message,
        },
    })?;

    config.matcher()?;

    let paths: &[(&str, &str)] = &[
        ("database.path", config.db_path.as_str()),
        ("data_paths.plays", config.data_paths.plays.as_str()),
        ("data_paths.predictions", config.data_paths.predictions.as_str()),
    ];
    for (field, value) in paths {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: field.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    if let Some(period) = &config.schedule.period {
        if period.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: "schedule.period".into(),
                message: "must not be empty when set; omit it to grade every period".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
