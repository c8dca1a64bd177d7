//! Resolver configuration.
//!
//! Stored as camelCase JSON at `~/.millmatch/config.json`. Every field has a
//! default, so an empty object (or no file at all) is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DbError, EntityDb, LinkedSource};
use crate::dictionaries::Dictionaries;
use crate::scoring::ScoreWeights;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Score cut-offs for the three decision bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    /// At or above: link automatically.
    pub auto_link: f64,
    /// At or above (and below `auto_link`): queue for human review.
    pub review: f64,
    /// Minimum score for autocomplete search results.
    pub search: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_link: 0.92,
            review: 0.75,
            search: 0.30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    pub thresholds: Thresholds,
    pub weights: ScoreWeights,
    /// Candidates kept on a review item.
    pub max_candidates: usize,
    /// Default result count for `search`.
    pub search_limit: usize,
    /// Catalog size above which fuzzy matching only scores entities that
    /// share a blocking key with the input.
    pub prefilter_min_catalog: usize,
    /// Attempts after a lost creation race before giving up with a conflict.
    pub write_retries: u32,
    /// Store file. Defaults to `~/.millmatch/entities.db`.
    pub database_path: Option<PathBuf>,
    pub dictionaries: Dictionaries,
    pub sources: Vec<LinkedSource>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            weights: ScoreWeights::default(),
            max_candidates: 5,
            search_limit: 10,
            prefilter_min_catalog: 2000,
            write_retries: 3,
            database_path: None,
            dictionaries: Dictionaries::default(),
            sources: Vec::new(),
        }
    }
}

impl ResolverConfig {
    /// Reject configurations the resolver cannot act on sensibly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        let ordered = 0.0 <= t.search && t.search <= t.review && t.review <= t.auto_link && t.auto_link <= 1.0;
        if !ordered {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy 0 <= search ({}) <= review ({}) <= autoLink ({}) <= 1",
                t.search, t.review, t.auto_link
            )));
        }

        let w = &self.weights;
        if w.levenshtein <= 0.0 || w.token_overlap < 0.0 || w.semantic < 0.0 {
            return Err(ConfigError::Invalid(
                "weights must be non-negative and levenshtein must be positive".to_string(),
            ));
        }

        if self.max_candidates == 0 {
            return Err(ConfigError::Invalid("maxCandidates must be at least 1".to_string()));
        }

        for source in &self.sources {
            source
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("source '{}': {}", source.label, e)))?;
        }
        Ok(())
    }

    /// Open the configured store and attach every external source.
    pub fn open_store(&self) -> Result<EntityDb, DbError> {
        let db = match &self.database_path {
            Some(path) => EntityDb::open_at(path.clone())?,
            None => EntityDb::open()?,
        };
        db.attach_sources(&self.sources)?;
        Ok(db)
    }
}

/// Default config path: `~/.millmatch/config.json`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;
    Ok(home.join(".millmatch").join("config.json"))
}

/// Load `~/.millmatch/config.json`, falling back to defaults when the file
/// does not exist.
pub fn load_config() -> Result<ResolverConfig, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(ResolverConfig::default());
    }
    load_config_from(&path)
}

/// Load and validate a config file. A missing file is an error.
pub fn load_config_from(path: &Path) -> Result<ResolverConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ResolverConfig =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}
