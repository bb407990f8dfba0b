//! Parallel chunking of document batches
use crate::chunking::{Chunk, ChunkError, Chunker};
use crate::corpus::Document;
use crate::error::{LexembedError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Chunking result for one document
#[derive(Debug)]
pub struct ChunkOutcome {
    pub document_id: String,
    pub result: std::result::Result<Vec<Chunk>, ChunkError>,
}

/// Runs the chunker on the blocking pool with bounded concurrency
pub struct ChunkStage {
    chunker: Arc<Chunker>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl ChunkStage {
    pub fn new(chunker: Arc<Chunker>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            chunker,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Chunk every document of a batch
    ///
    /// Submission waits for a free worker. Outcomes come back in submission
    /// order whatever order the workers finish in.
    pub async fn chunk_batch(&self, documents: Vec<Document>) -> Result<Vec<ChunkOutcome>> {
        let mut handles = Vec::with_capacity(documents.len());

        for document in documents {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| LexembedError::Pipeline(format!("Worker pool closed: {}", e)))?;
            let chunker = Arc::clone(&self.chunker);

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let result = chunker.chunk(&document);
                ChunkOutcome {
                    document_id: document.id,
                    result,
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| LexembedError::Pipeline(format!("Chunking task failed: {}", e)))?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}
