//! Configuration management for amem
//!
//! Settings are read from a TOML file, then environment overrides
//! (`AMEM_SECTION__KEY=value`) are applied, then an optional named profile.
//! The result is validated as a whole so every problem is reported at once.

use crate::chunking::ChunkingConfig;
use crate::concepts::ConceptConfig;
use crate::embedding::{EmbeddingConfig, IndexConfig};
use crate::error::{AmemError, Result};
use crate::retrieval::RankingConfig;
use crate::workspace::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

mod validator;

pub use validator::ConfigValidator;

/// Schema version written by `amem config init`
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub concepts: ConceptConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the feedback database and item blobs; `~/` is expanded
    pub data_dir: PathBuf,
    /// Item bodies at least this many bytes are stored zstd-compressed
    pub compression_threshold: usize,
    /// Files larger than this are skipped by `amem index` ("512KB", "10MB", ...)
    pub max_file_size: String,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_lambda: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept_boost: Option<f32>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AmemError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file, creating its directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AmemError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| AmemError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides; unknown profiles are an error
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| AmemError::InvalidConfigValue {
                path: format!("profiles.{}", profile),
                message: "Profile is not defined".to_string(),
            })?;

        if let Some(data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir;
        }
        if let Some(window) = overrides.window {
            self.chunking.window = window;
        }
        if let Some(overlap) = overrides.overlap {
            self.chunking.overlap = overlap;
        }
        if let Some(mmr) = overrides.mmr {
            self.index.mmr = mmr;
        }
        if let Some(lambda) = overrides.mmr_lambda {
            self.index.mmr_lambda = lambda;
        }
        if let Some(beta) = overrides.beta {
            self.ranking.beta = beta;
        }
        if let Some(boost) = overrides.concept_boost {
            self.ranking.concept_boost = boost;
        }

        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: AMEM_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("AMEM_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__COMPRESSION_THRESHOLD" => {
                self.storage.compression_threshold = parse_env(path, value)?
            }
            "STORAGE__MAX_FILE_SIZE" => self.storage.max_file_size = value.to_string(),
            "EMBEDDING__NAMESPACE" => self.embedding.namespace = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_env(path, value)?,
            "CHUNKING__WINDOW" => self.chunking.window = parse_env(path, value)?,
            "CHUNKING__OVERLAP" => self.chunking.overlap = parse_env(path, value)?,
            "INDEX__CANDIDATE_MULTIPLIER" => {
                self.index.candidate_multiplier = parse_env(path, value)?
            }
            "INDEX__MMR" => self.index.mmr = parse_env(path, value)?,
            "INDEX__MMR_LAMBDA" => self.index.mmr_lambda = parse_env(path, value)?,
            "CONCEPTS__STABLE_SUPPORT" => self.concepts.stable_support = parse_env(path, value)?,
            "CONCEPTS__RELATED_THRESHOLD" => {
                self.concepts.related_threshold = parse_env(path, value)?
            }
            "RANKING__ALPHA" => self.ranking.alpha = parse_env(path, value)?,
            "RANKING__BETA" => self.ranking.beta = parse_env(path, value)?,
            "RANKING__GAMMA" => self.ranking.gamma = parse_env(path, value)?,
            "RANKING__DELTA" => self.ranking.delta = parse_env(path, value)?,
            "RANKING__HALF_LIFE_DAYS" => self.ranking.half_life_days = parse_env(path, value)?,
            "RANKING__CONCEPT_BOOST" => self.ranking.concept_boost = parse_env(path, value)?,
            "RANKING__CLUSTER_THRESHOLD" => {
                self.ranking.cluster_threshold = parse_env(path, value)?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Engine settings handed to every workspace
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            embedding: self.embedding.clone(),
            chunking: self.chunking.clone(),
            index: self.index.clone(),
            concepts: self.concepts.clone(),
            ranking: self.ranking.clone(),
        }
    }

    /// Data directory with a leading `~/` expanded
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }

    /// `storage.max_file_size` in bytes
    pub fn max_file_bytes(&self) -> Result<u64> {
        parse_size(&self.storage.max_file_size).ok_or_else(|| AmemError::InvalidConfigValue {
            path: "storage.max_file_size".to_string(),
            message: format!("Invalid size format: {}", self.storage.max_file_size),
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AmemError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("amem").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| AmemError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".amem"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.amem"),
                compression_threshold: 1024,
                max_file_size: "10MB".to_string(),
            },
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            index: IndexConfig::default(),
            concepts: ConceptConfig::default(),
            ranking: RankingConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| AmemError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| AmemError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| AmemError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Parse sizes like `4096`, `512B`, `64KB`, `10MB`, `1GB` (binary multiples)
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix("GB") {
        (n, 1u64 << 30)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1 << 20)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1 << 10)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };

    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.chunking.window = 200;
        config.chunking.overlap = 40;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.chunking.window, 200);
        assert_eq!(loaded.chunking.overlap, 40);
        assert_eq!(loaded.meta.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[_meta]
schema_version = "1.0.0"

[storage]
data_dir = "/tmp/amem"
compression_threshold = 2048
max_file_size = "1MB"

[ranking]
beta = 0.5
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ranking.beta, 0.5);
        assert_eq!(config.ranking.alpha, 0.6);
        assert_eq!(config.chunking.window, 800);
        assert_eq!(config.embedding.dimension, 384);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/amem.toml")).unwrap_err();
        assert!(matches!(err, AmemError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "precise".to_string(),
            ProfileOverrides {
                mmr: Some(false),
                beta: Some(0.0),
                window: Some(256),
                overlap: Some(32),
                ..Default::default()
            },
        );

        config.apply_profile("precise").unwrap();
        assert!(!config.index.mmr);
        assert_eq!(config.ranking.beta, 0.0);
        assert_eq!(config.engine().chunking.window, 256);

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_env_value_parsing() {
        let mut config = Config::default();
        config.set_value_from_env("CHUNKING__WINDOW", "128").unwrap();
        config.set_value_from_env("INDEX__MMR", "false").unwrap();
        config.set_value_from_env("RANKING__BETA", "0.25").unwrap();
        config.set_value_from_env("SOMETHING__ELSE", "x").unwrap();

        assert_eq!(config.chunking.window, 128);
        assert!(!config.index.mmr);
        assert_eq!(config.ranking.beta, 0.25);
        assert!(config.set_value_from_env("CHUNKING__WINDOW", "wide").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("64kb"), Some(64 * 1024));
        assert_eq!(parse_size("10MB"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("1GB"), Some(1 << 30));
        assert_eq!(parse_size("ten"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_expand_path() {
        let absolute = expand_path(Path::new("/var/lib/amem")).unwrap();
        assert_eq!(absolute, PathBuf::from("/var/lib/amem"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path(Path::new("~/.amem")).unwrap(), home.join(".amem"));
        }
    }
}
