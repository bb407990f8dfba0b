#![allow(dead_code)]

use lexembed::chunking::{ChunkError, TokenCounter};
use lexembed::config::Config;
use lexembed::embedding::{EmbeddingError, EmbeddingProvider};
use lexembed::pipeline::StopHandle;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const DIMENSION: usize = 4;

/// One token per whitespace-separated word; texts containing "poison" fail
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, ChunkError> {
        if text.contains("poison") {
            return Err(ChunkError::Tokenizer("poisoned text".to_string()));
        }
        Ok(text.split_whitespace().count())
    }
}

/// Deterministic embedding model that records every invocation
#[derive(Default)]
pub struct MockProvider {
    pub batches: Mutex<Vec<Vec<String>>>,
    calls: AtomicUsize,
    /// Invocation (1-based) from which every call fails
    fail_from: Option<usize>,
    /// Request a stop during this invocation (1-based)
    stop_at: Option<(usize, StopHandle)>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_from(call: usize) -> Self {
        Self {
            fail_from: Some(call),
            ..Self::default()
        }
    }

    pub fn stopping_at(call: usize, stop: StopHandle) -> Self {
        Self {
            stop_at: Some((call, stop)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.batches.lock().unwrap().concat()
    }
}

pub fn mock_embedding(text: &str) -> Vec<f32> {
    vec![
        text.len() as f32,
        text.split_whitespace().count() as f32,
        text.bytes().map(u32::from).sum::<u32>() as f32,
        1.0,
    ]
}

impl EmbeddingProvider for MockProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((at, stop)) = &self.stop_at {
            if call == *at {
                stop.stop();
            }
        }
        if matches!(self.fail_from, Some(from) if call >= from) {
            return Err(EmbeddingError::GenerationError(format!(
                "simulated failure on call {}",
                call
            )));
        }

        self.batches.lock().unwrap().push(texts.to_vec());
        Ok(texts.iter().map(|t| mock_embedding(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "mock/model"
    }
}

/// Configuration for a run inside `dir`, with the header disabled
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.corpus.path = dir.join("corpus.jsonl");
    config.output.dir = dir.join("out");
    config.header.enabled = false;
    config.chunking.workers = 2;
    config.chunking.batch_size = 2;
    config.embedding.batch_size = 1;
    config
}

/// A corpus line in the legal corpus shape
pub fn record(id: &str, text: &str) -> String {
    json!({
        "version_id": id,
        "type": "primary_legislation",
        "jurisdiction": "tasmania",
        "source": "tasmanian_legislation",
        "citation": format!("Act {}", id),
        "url": format!("https://example.org/{}", id),
        "text": text,
    })
    .to_string()
}

pub fn write_corpus(config: &Config, lines: &[String]) {
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(&config.corpus.path, content).unwrap();
}

/// Document ids of the stored chunks, one per chunk
pub fn stored_ids(config: &Config) -> Vec<String> {
    let store = lexembed::storage::OutputStore::open_existing(&config.output.dir).unwrap();
    store
        .read_all()
        .unwrap()
        .into_iter()
        .map(|c| c.document_id)
        .collect()
}

/// Stored document ids with consecutive repeats collapsed
pub fn stored_documents(config: &Config) -> Vec<String> {
    let mut ids = stored_ids(config);
    ids.dedup();
    ids
}
