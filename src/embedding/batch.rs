/// Batched embedding of chunk streams
use super::{EmbeddingError, EmbeddingProvider};
use crate::chunking::Chunk;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A chunk paired with its embedding vector
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Groups a chunk stream into batches of at most `batch_size`
///
/// Batches span document boundaries. Only a short final batch is emitted
/// below the bound; batches are never padded.
#[derive(Debug)]
pub struct ChunkBatcher {
    pending: Vec<Chunk>,
    batch_size: usize,
}

impl ChunkBatcher {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Add a chunk, returning a full batch once the bound is reached
    pub fn push(&mut self, chunk: Chunk) -> Option<Vec<Chunk>> {
        self.pending.push(chunk);
        if self.pending.len() >= self.batch_size {
            Some(std::mem::replace(
                &mut self.pending,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    /// Take whatever is left, if anything
    pub fn finish(&mut self) -> Option<Vec<Chunk>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Submits chunk batches to the embedding model
///
/// The model is shared read-only and invoked once per batch from the
/// blocking pool; batches are submitted one at a time.
pub struct EmbeddingStage {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_retries: usize,
    invocations: AtomicUsize,
}

impl EmbeddingStage {
    /// Create a new embedding stage
    ///
    /// # Arguments
    /// * `provider` - Embedding model
    /// * `batch_size` - Maximum number of texts per model invocation
    /// * `max_retries` - Extra attempts for a failed batch before giving up
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, max_retries: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_retries,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of model invocations made so far
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn batcher(&self) -> ChunkBatcher {
        ChunkBatcher::new(self.batch_size)
    }

    /// Embed one batch of chunks, pairing vectors with chunks by position
    pub async fn embed(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>, EmbeddingError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        if chunks.len() > self.batch_size {
            return Err(EmbeddingError::InvalidInput(format!(
                "Batch of {} chunks exceeds the limit of {}",
                chunks.len(),
                self.batch_size
            )));
        }

        let texts: Arc<Vec<String>> =
            Arc::new(chunks.iter().map(Chunk::embedding_input).collect());

        let mut attempt = 0;
        let embeddings = loop {
            attempt += 1;
            match self.invoke(Arc::clone(&texts)).await {
                Ok(embeddings) => break embeddings,
                Err(e) if attempt <= self.max_retries => {
                    warn!(
                        "Embedding attempt {} of {} failed: {}",
                        attempt,
                        self.max_retries + 1,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        };

        if embeddings.len() != chunks.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunks.len(),
                actual: embeddings.len(),
            });
        }

        let expected = self.provider.dimension();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        debug!("Embedded batch of {} chunks", chunks.len());

        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect())
    }

    async fn invoke(&self, texts: Arc<Vec<String>>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let provider = Arc::clone(&self.provider);

        tokio::task::spawn_blocking(move || provider.embed_batch(&texts))
            .await
            .map_err(|e| EmbeddingError::GenerationError(format!("Embedding task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::Mutex;

    /// Returns `[index, len]` vectors and records every batch it receives
    struct Recording {
        batches: Mutex<Vec<Vec<String>>>,
        fail_first: AtomicUsize,
    }

    impl Recording {
        fn new(fail_first: usize) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail_first: AtomicUsize::new(fail_first),
            }
        }
    }

    impl EmbeddingProvider for Recording {
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EmbeddingError::GenerationError("transient".to_string()));
            }
            self.batches.lock().unwrap().push(texts.to_vec());
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, t)| vec![i as f32, t.len() as f32])
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn chunk(doc: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            document_id: Arc::from(doc),
            index,
            text: text.to_string(),
            start: 0,
            end: text.len(),
            token_count: 1,
            is_last: false,
            header: None,
            metadata: Arc::new(Map::new()),
        }
    }

    #[test]
    fn test_batcher_bounds() {
        let mut batcher = ChunkBatcher::new(2);
        assert!(batcher.push(chunk("a", 0, "x")).is_none());
        let full = batcher.push(chunk("b", 0, "y")).unwrap();
        assert_eq!(full.len(), 2);

        assert!(batcher.push(chunk("c", 0, "z")).is_none());
        assert_eq!(batcher.finish().unwrap().len(), 1);
        assert!(batcher.finish().is_none());
    }

    #[tokio::test]
    async fn test_pairs_by_position() {
        let provider = Arc::new(Recording::new(0));
        let stage = EmbeddingStage::new(provider.clone(), 4, 0);

        let mut first = chunk("a", 0, "abc");
        first.header = Some(Arc::from("H: "));
        let embedded = stage
            .embed(vec![first, chunk("a", 1, "de"), chunk("b", 0, "f")])
            .await
            .unwrap();

        assert_eq!(embedded.len(), 3);
        assert_eq!(embedded[0].embedding, vec![0.0, 6.0]);
        assert_eq!(embedded[1].embedding, vec![1.0, 2.0]);
        assert_eq!(&*embedded[2].chunk.document_id, "b");
        assert_eq!(stage.invocations(), 1);

        let batches = provider.batches.lock().unwrap();
        assert_eq!(batches[0][0], "H: abc");
    }

    #[tokio::test]
    async fn test_rejects_oversized_batch() {
        let stage = EmbeddingStage::new(Arc::new(Recording::new(0)), 1, 0);
        let result = stage.embed(vec![chunk("a", 0, "x"), chunk("a", 1, "y")]).await;
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
        assert_eq!(stage.invocations(), 0);
    }

    #[tokio::test]
    async fn test_failure_without_retries() {
        let stage = EmbeddingStage::new(Arc::new(Recording::new(1)), 2, 0);
        let result = stage.embed(vec![chunk("a", 0, "x")]).await;
        assert!(matches!(result, Err(EmbeddingError::GenerationError(_))));
        assert_eq!(stage.invocations(), 1);
    }

    #[tokio::test]
    async fn test_retries_whole_batch() {
        let provider = Arc::new(Recording::new(2));
        let stage = EmbeddingStage::new(provider.clone(), 2, 2);

        let embedded = stage
            .embed(vec![chunk("a", 0, "x"), chunk("a", 1, "y")])
            .await
            .unwrap();
        assert_eq!(embedded.len(), 2);
        assert_eq!(stage.invocations(), 3);
        assert_eq!(provider.batches.lock().unwrap().len(), 1);
    }
}
