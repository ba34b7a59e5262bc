//! Pipeline configuration.
//!
//! Loaded from YAML; every field has a default so an empty file (or no file)
//! is a valid configuration. Paths may use `~` and `$VAR`.
//!
//! ```yaml
//! database:
//!   path: ~/newscrawl/news.db
//! index:
//!   dir: ~/newscrawl/indexes
//!   build:
//!     max_degree: 64
//!     search_list_size: 100
//! embedding:
//!   base_url: http://localhost:8080/v1
//!   model: intfloat/multilingual-e5-large
//!   api_key_env: EMBEDDING_API_KEY
//! ```

use crate::embeddings::PromptConvention;
use crate::index::{BuildParams, IndexSpec, DEFAULT_EMBEDDING_DIM};
use crate::types::error::{NewsIndexError, Result};
use crate::types::Precision;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the int8 calibration artifact.
pub const CALIBRATION_FILE: &str = "calibration_ranges.npy";

/// File name of the build manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Relational store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// Rows per ingest transaction
    pub batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("news.db"),
            batch_size: 1000,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the index files, calibration, and manifest
    pub dir: PathBuf,

    /// Default number of search results
    pub top_k: usize,

    /// Graph construction and query parameters
    pub build: BuildParams,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("indexes"),
            top_k: 10,
            build: BuildParams::default(),
        }
    }
}

/// Embedding endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Root of an OpenAI-compatible API
    pub base_url: String,

    /// Model name sent with each request
    pub model: String,

    /// Environment variable holding the bearer token, if any
    pub api_key_env: Option<String>,

    /// Embedding width
    pub dimensions: usize,

    /// Texts per request during index builds
    pub batch_size: usize,

    /// Query and passage prefixes
    #[serde(flatten)]
    pub prompts: PromptConvention,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            model: "intfloat/multilingual-e5-large".to_string(),
            api_key_env: Some("EMBEDDING_API_KEY".to_string()),
            dimensions: DEFAULT_EMBEDDING_DIM,
            batch_size: 64,
            prompts: PromptConvention::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load from a YAML file and expand its paths.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::Config` if the file is not valid YAML for this
    /// schema or a path variable cannot be expanded
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)
            .map_err(|e| NewsIndexError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Load `path` if given, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::default().expanded(),
        }
    }

    /// Parse YAML text and expand its paths.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| NewsIndexError::Config(format!("invalid config: {}", e)))?
        };
        config.validate()?;
        config.expanded()
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| NewsIndexError::Config(format!("serialize error: {}", e)))
    }

    fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(NewsIndexError::Config("embedding.dimensions must be > 0".to_string()));
        }
        if self.embedding.batch_size == 0 || self.database.batch_size == 0 {
            return Err(NewsIndexError::Config("batch sizes must be > 0".to_string()));
        }
        if self.index.build.max_degree == 0 || self.index.build.search_list_size == 0 {
            return Err(NewsIndexError::Config(
                "index.build.max_degree and search_list_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    fn expanded(mut self) -> Result<Self> {
        self.database.path = expand_path(&self.database.path)?;
        self.index.dir = expand_path(&self.index.dir)?;
        Ok(self)
    }

    /// Spec of the index for `precision`.
    pub fn index_spec(&self, precision: Precision) -> IndexSpec {
        IndexSpec::for_embedding(precision, self.embedding.dimensions)
    }

    /// Path of the index file for `precision`.
    pub fn index_path(&self, precision: Precision) -> PathBuf {
        self.index.dir.join(self.index_spec(precision).file_name())
    }

    /// Path of the calibration artifact.
    pub fn calibration_path(&self) -> PathBuf {
        self.index.dir.join(CALIBRATION_FILE)
    }

    /// Path of the build manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.index.dir.join(MANIFEST_FILE)
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map_err(|e| NewsIndexError::Config(format!("cannot expand '{}': {}", raw, e)))?;
    Ok(PathBuf::from(expanded.into_owned()))
}
