use crate::chunking::ChunkError;
use crate::corpus::CorpusRecordError;
use crate::embedding::EmbeddingError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for lexembed
#[derive(Error, Debug)]
pub enum LexembedError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Corpus file could not be found
    #[error("Corpus not found at {path}")]
    CorpusNotFound { path: PathBuf },

    /// A corpus record that could not be decoded (abort policy)
    #[error(transparent)]
    CorpusRecord(#[from] CorpusRecordError),

    /// A document that could not be chunked (abort policy)
    #[error("Failed to chunk document {document_id}: {source}")]
    Chunking {
        document_id: String,
        source: ChunkError,
    },

    /// Model invocation or initialization failure
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Pipeline task failures (panicked or cancelled workers)
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl LexembedError {
    /// Wrap an IO error with a description of what was being attempted
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for lexembed operations
pub type Result<T> = std::result::Result<T, LexembedError>;
