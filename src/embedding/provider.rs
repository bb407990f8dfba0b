/// Embedding provider trait and FastEmbed implementation
use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: submitted {expected} texts, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Allows substituting the model behind the pipeline (FastEmbed in
/// production, deterministic fakes in tests).
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts, one vector per text in order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Options controlling model download and caching
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    pub cache_dir: Option<PathBuf>,
    pub show_download_progress: bool,
}

/// FastEmbed provider for local embedding generation
///
/// Runs the ONNX export of a sentence-embedding model on the local machine.
/// The model is downloaded to the fastembed cache on first use.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider for a model
    ///
    /// Accepts a Hugging Face model code ("BAAI/bge-small-en-v1.5") or the
    /// bare model name ("bge-small-en-v1.5"). The resolved name reported by
    /// `model_name` is the repository fastembed downloads from, which also
    /// hosts the matching tokenizer.
    pub fn new(model_name: &str, options: &ProviderOptions) -> Result<Self, EmbeddingError> {
        let supported = TextEmbedding::list_supported_models();
        let wanted = normalize_model_name(model_name);

        let info = supported
            .iter()
            .find(|info| info.model_code.eq_ignore_ascii_case(model_name))
            .or_else(|| {
                supported
                    .iter()
                    .find(|info| normalize_model_name(&info.model_code) == wanted)
            })
            .ok_or_else(|| {
                let codes: Vec<&str> = supported.iter().map(|i| i.model_code.as_str()).collect();
                EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: {}",
                    model_name,
                    codes.join(", ")
                ))
            })?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, download if not cached)",
            info.model_code,
            info.dim
        );

        let mut init_options = InitOptions::new(info.model.clone())
            .with_show_download_progress(options.show_download_progress);
        if let Some(cache_dir) = &options.cache_dir {
            init_options = init_options.with_cache_dir(cache_dir.clone());
        }

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: info.model_code.clone(),
            dimension: info.dim,
        })
    }
}

/// Lower-cased repository name without owner or ONNX suffix
fn normalize_model_name(name: &str) -> String {
    let short = name.rsplit('/').next().unwrap_or(name).to_ascii_lowercase();
    short
        .strip_suffix("-onnx")
        .map(str::to_string)
        .unwrap_or(short)
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Vectors are paired with inputs by position, so nothing may be dropped
        if let Some(pos) = texts.iter().position(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Empty text at position {}",
                pos
            )));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), Some(texts.len()))
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            });
        }

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
