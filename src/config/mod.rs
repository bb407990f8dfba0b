//! Configuration management for lexembed
//!
//! Handles loading, validation, profile and environment overrides of the
//! pipeline configuration. CLI flags are applied on top by the binary.

use crate::error::{LexembedError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Schema version understood by this build
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub corpus: CorpusConfig,
    pub output: OutputConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub header: HeaderConfig,
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

/// What to do when a single record or document cannot be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log, count and continue with the next record
    Skip,
    /// Stop the run with an error
    Abort,
}

impl std::str::FromStr for ErrorPolicy {
    type Err = LexembedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(LexembedError::Config(format!(
                "Unknown error policy '{}', expected 'skip' or 'abort'",
                other
            ))),
        }
    }
}

/// Input corpus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Path to the line-delimited JSON corpus
    pub path: PathBuf,
    /// Record field holding the unique document identifier
    pub id_field: String,
    /// Record field holding the document body
    pub text_field: String,
    /// Policy for lines that cannot be decoded
    pub on_malformed: ErrorPolicy,
}

/// Output directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Remove documents from output that no longer appear in the corpus
    pub prune_outdated: bool,
    /// fsync data files after every embedding batch
    pub sync_writes: bool,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum number of tokens a chunk may contain, header included
    pub chunk_size: usize,
    /// Maximum number of documents chunked at once
    pub batch_size: usize,
    /// Number of concurrent chunking workers (0 = available parallelism)
    pub workers: usize,
    /// Policy for documents whose chunking fails
    pub on_error: ErrorPolicy,
    /// Local tokenizer.json to use instead of fetching the model's tokenizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_file: Option<PathBuf>,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Hugging Face model code (e.g. "BAAI/bge-small-en-v1.5")
    pub model: String,
    /// Maximum number of chunks embedded at once
    pub batch_size: usize,
    /// Extra attempts for a failed batch before the run is aborted
    #[serde(default)]
    pub max_retries: usize,
    /// Model cache directory (fastembed default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub show_download_progress: bool,
}

/// Per-chunk context header prepended before embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    pub enabled: bool,
    /// Template with `{field}` placeholders resolved from document metadata
    pub template: String,
    /// Per-field value translations, e.g. jurisdiction codes to names
    #[serde(default)]
    pub mappings: BTreeMap<String, BTreeMap<String, String>>,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunking_batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_batch_size: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LexembedError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LexembedError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LexembedError::Io {
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

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LexembedError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(size) = overrides.chunk_size {
            self.chunking.chunk_size = size;
        }
        if let Some(size) = overrides.chunking_batch_size {
            self.chunking.batch_size = size;
        }
        if let Some(size) = overrides.embedding_batch_size {
            self.embedding.batch_size = size;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LEXEMBED_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LEXEMBED_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "CORPUS__PATH" => self.corpus.path = PathBuf::from(value),
            "CORPUS__ON_MALFORMED" => self.corpus.on_malformed = value.parse()?,
            "OUTPUT__DIR" => self.output.dir = PathBuf::from(value),
            "CHUNKING__CHUNK_SIZE" => self.chunking.chunk_size = parse_usize(path, value)?,
            "CHUNKING__BATCH_SIZE" => self.chunking.batch_size = parse_usize(path, value)?,
            "CHUNKING__WORKERS" => self.chunking.workers = parse_usize(path, value)?,
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_usize(path, value)?,
            "HEADER__ENABLED" => {
                self.header.enabled =
                    value
                        .parse()
                        .map_err(|_| LexembedError::InvalidConfigValue {
                            path: path.to_string(),
                            message: format!("Cannot parse '{}' as boolean", value),
                        })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Number of chunking workers, resolving 0 to the machine's parallelism
    pub fn chunking_workers(&self) -> usize {
        if self.chunking.workers > 0 {
            return self.chunking.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            LexembedError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("lexembed").join("config.toml"))
    }
}

fn parse_usize(path: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| LexembedError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}' as a non-negative integer", value),
        })
}

/// Header template used for the Open Australian Legal Corpus
pub const DEFAULT_HEADER_TEMPLATE: &str =
    "Title: {citation}\nJurisdiction: {jurisdiction}\nType: {type}\n";

fn default_header_mappings() -> BTreeMap<String, BTreeMap<String, String>> {
    let jurisdictions = [
        ("commonwealth", "Commonwealth of Australia"),
        ("new_south_wales", "New South Wales"),
        ("norfolk_island", "Norfolk Island"),
        ("queensland", "Queensland"),
        ("south_australia", "South Australia"),
        ("tasmania", "Tasmania"),
        ("western_australia", "Western Australia"),
    ];
    let types = [
        ("primary_legislation", "Act"),
        ("secondary_legislation", "Regulation"),
        ("bill", "Bill"),
        ("decision", "Judgment"),
    ];

    let to_map = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
    };

    let mut mappings = BTreeMap::new();
    mappings.insert("jurisdiction".to_string(), to_map(&jurisdictions));
    mappings.insert("type".to_string(), to_map(&types));
    mappings
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            corpus: CorpusConfig {
                path: PathBuf::from("corpus.jsonl"),
                id_field: "version_id".to_string(),
                text_field: "text".to_string(),
                on_malformed: ErrorPolicy::Skip,
            },
            output: OutputConfig {
                dir: PathBuf::from("data"),
                prune_outdated: true,
                sync_writes: false,
            },
            chunking: ChunkingConfig {
                chunk_size: 512,
                batch_size: 4096,
                workers: 0,
                on_error: ErrorPolicy::Skip,
                tokenizer_file: None,
            },
            embedding: EmbeddingConfig {
                model: "BAAI/bge-small-en-v1.5".to_string(),
                batch_size: 32,
                max_retries: 0,
                cache_dir: None,
                show_download_progress: true,
            },
            header: HeaderConfig {
                enabled: true,
                template: DEFAULT_HEADER_TEMPLATE.to_string(),
                mappings: default_header_mappings(),
            },
            profiles: HashMap::new(),
        }
    }
}
