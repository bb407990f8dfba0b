//! Resumable chunk-and-embed run
//!
//! Flow: corpus reader (blocking task) -> bounded channel -> parallel chunking
//! -> embedding batches -> output writer. Output is appended in corpus order
//! and flushed per embedding batch; the checkpoint scan on the next start
//! skips every document that was fully written.
mod chunk_stage;
mod reader;
mod signals;

pub use chunk_stage::{ChunkOutcome, ChunkStage};
pub use reader::{corpus_ids, read_corpus, ReadStats};
pub use signals::SignalHandler;

use crate::chunking::{Chunk, Chunker, HeaderTemplate, TokenCounter};
use crate::config::{Config, ErrorPolicy};
use crate::corpus::RecordFields;
use crate::embedding::{EmbeddingProvider, EmbeddingStage};
use crate::error::{LexembedError, Result};
use crate::storage::{Checkpoint, Manifest, OutputStore, OutputWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Cooperative stop flag shared between the run and whoever requests the stop
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop after the embedding batch in flight
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Well-formed records read from the corpus
    pub documents_seen: usize,
    /// Skipped because the output already holds them
    pub already_present: usize,
    /// Skipped because an earlier record had the same id
    pub duplicates: usize,
    /// Documents whose chunks were all written during this run
    pub processed: usize,
    /// Document batches handed to the chunking stage
    pub chunking_batches: usize,
    /// Documents with no text to chunk
    pub empty: usize,
    pub failed_to_chunk: usize,
    pub malformed_records: usize,
    pub chunks_embedded: usize,
    pub outdated_removed: usize,
    /// Lines discarded from an interrupted earlier run
    pub repaired_lines: usize,
    pub stopped: bool,
    pub elapsed: Duration,
}

/// Drives a run over the configured corpus and output directory
pub struct Pipeline {
    config: Config,
    counter: Arc<dyn TokenCounter>,
    provider: Arc<dyn EmbeddingProvider>,
    stop: StopHandle,
}

impl Pipeline {
    /// Create a pipeline
    ///
    /// The tokenizer and model are loaded by the caller and shared for the
    /// whole run.
    pub fn new(
        config: Config,
        counter: Arc<dyn TokenCounter>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            counter,
            provider,
            stop: StopHandle::new(),
        }
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Manifest describing output produced by this pipeline
    pub fn manifest(&self) -> Manifest {
        let header = HeaderTemplate::from_config(&self.config.header);
        let mappings = header
            .as_ref()
            .map(|h| h.mappings().clone())
            .unwrap_or_default();
        Manifest::new(
            self.provider.model_name(),
            self.provider.dimension(),
            self.config.chunking.chunk_size,
            header.map(|h| h.source().to_string()),
        )
        .with_header_mappings(mappings)
    }

    /// Process every corpus document not yet present in the output
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let config = &self.config;
        let mut summary = RunSummary::default();

        if !config.corpus.path.is_file() {
            return Err(LexembedError::CorpusNotFound {
                path: config.corpus.path.clone(),
            });
        }

        let chunker = Chunker::new(Arc::clone(&self.counter), config.chunking.chunk_size)
            .map_err(|e| LexembedError::InvalidConfigValue {
                path: "chunking.chunk_size".to_string(),
                message: e.to_string(),
            })?
            .with_header(HeaderTemplate::from_config(&config.header));

        let store = OutputStore::open(&config.output.dir, &self.manifest())?;
        let checkpoint = self.prepare_output(&store, &mut summary).await?;
        info!(
            "{} documents already embedded in {}",
            checkpoint.document_count(),
            store.dir().display()
        );

        let (tx, mut rx) = mpsc::channel(1);
        let reader = {
            let path = config.corpus.path.clone();
            let fields = self.record_fields();
            let policy = config.corpus.on_malformed;
            let batch_size = config.chunking.batch_size;
            let completed = checkpoint.into_completed();
            tokio::task::spawn_blocking(move || {
                read_corpus(&path, fields, policy, batch_size, completed, tx)
            })
        };

        let chunk_stage = ChunkStage::new(Arc::new(chunker), config.chunking_workers());
        let embedding_stage = EmbeddingStage::new(
            Arc::clone(&self.provider),
            config.embedding.batch_size,
            config.embedding.max_retries,
        );
        let mut batcher = embedding_stage.batcher();
        let mut writer = store.writer(config.output.sync_writes)?;

        info!(
            "Processing {} with {} chunking workers, chunk size {}, embedding batches of {}",
            config.corpus.path.display(),
            chunk_stage.workers(),
            config.chunking.chunk_size,
            embedding_stage.batch_size()
        );

        let mut batch_no = 0usize;
        'run: while let Some(documents) = rx.recv().await {
            if self.stop.is_stopped() {
                summary.stopped = true;
                break;
            }
            batch_no += 1;
            summary.chunking_batches = batch_no;
            let batch_len = documents.len();
            debug!("Chunking batch {} of {} documents", batch_no, batch_len);

            for outcome in chunk_stage.chunk_batch(documents).await? {
                let chunks = match outcome.result {
                    Ok(chunks) if chunks.is_empty() => {
                        debug!("Document {} has no text", outcome.document_id);
                        summary.empty += 1;
                        continue;
                    }
                    Ok(chunks) => chunks,
                    Err(e) if config.chunking.on_error == ErrorPolicy::Skip => {
                        error!("Skipping document {}: {}", outcome.document_id, e);
                        summary.failed_to_chunk += 1;
                        continue;
                    }
                    Err(e) => {
                        return Err(LexembedError::Chunking {
                            document_id: outcome.document_id,
                            source: e,
                        })
                    }
                };

                for chunk in chunks {
                    if let Some(batch) = batcher.push(chunk) {
                        if self.stop.is_stopped() {
                            summary.stopped = true;
                            break 'run;
                        }
                        embed_and_write(&embedding_stage, &mut writer, batch, &mut summary)
                            .await?;
                    }
                }
            }

            info!(
                "Batch {}: chunked {} documents ({} processed, {} chunks embedded so far)",
                batch_no, batch_len, summary.processed, summary.chunks_embedded
            );
        }

        if !summary.stopped {
            if let Some(batch) = batcher.finish() {
                if self.stop.is_stopped() {
                    summary.stopped = true;
                } else {
                    embed_and_write(&embedding_stage, &mut writer, batch, &mut summary).await?;
                }
            }
        }

        drop(rx);
        let stats = reader
            .await
            .map_err(|e| LexembedError::Pipeline(format!("Corpus reader failed: {}", e)))??;
        summary.documents_seen = stats.seen;
        summary.already_present = stats.already_present;
        summary.duplicates = stats.duplicates;
        summary.malformed_records = stats.malformed;

        drop(writer);
        if summary.stopped {
            // Leave only whole documents behind
            let checkpoint = Checkpoint::scan(&store)?;
            store.truncate_to(&checkpoint)?;
            warn!(
                "Stopped early; {} documents are complete in the output",
                checkpoint.document_count()
            );
        }

        summary.elapsed = started.elapsed();
        info!(
            "Run finished: {} processed, {} already present, {} chunks embedded in {:.1}s",
            summary.processed,
            summary.already_present,
            summary.chunks_embedded,
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }

    /// Repair the output left by an earlier run and drop outdated documents
    async fn prepare_output(
        &self,
        store: &OutputStore,
        summary: &mut RunSummary,
    ) -> Result<Checkpoint> {
        let mut checkpoint = Checkpoint::scan(store)?;

        if checkpoint.is_dirty() {
            summary.repaired_lines = checkpoint.discarded_lines();
            warn!(
                "Discarding {} lines left by an interrupted run",
                summary.repaired_lines
            );
            store.truncate_to(&checkpoint)?;
        }

        if self.config.output.prune_outdated && checkpoint.document_count() > 0 {
            let path = self.config.corpus.path.clone();
            let fields = self.record_fields();
            let ids = tokio::task::spawn_blocking(move || corpus_ids(&path, fields))
                .await
                .map_err(|e| LexembedError::Pipeline(format!("Corpus scan failed: {}", e)))??;

            let removed = store.remove_documents(&checkpoint, |id| ids.contains(id))?;
            if removed > 0 {
                info!("Removed {} documents no longer in the corpus", removed);
                summary.outdated_removed = removed;
                checkpoint = Checkpoint::scan(store)?;
            }
        }

        Ok(checkpoint)
    }

    fn record_fields(&self) -> RecordFields {
        RecordFields::new(
            self.config.corpus.id_field.clone(),
            self.config.corpus.text_field.clone(),
        )
    }
}

async fn embed_and_write(
    stage: &EmbeddingStage,
    writer: &mut OutputWriter,
    batch: Vec<Chunk>,
    summary: &mut RunSummary,
) -> Result<()> {
    let embedded = stage.embed(batch).await?;
    summary.processed += writer.write_batch(&embedded)?;
    summary.chunks_embedded += embedded.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_handle_is_shared() {
        let stop = StopHandle::new();
        let clone = stop.clone();
        assert!(!clone.is_stopped());

        stop.stop();
        assert!(clone.is_stopped());
    }
}
