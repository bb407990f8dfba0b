//! Token-bounded document chunking
//!
//! Architecture:
//! - `TokenCounter` trait abstracts the tokenizer (HfTokenCounter in production)
//! - `splitter` cuts text at the coarsest natural boundary that fits
//!   (`text-splitter`, sized by the `TokenCounter`)
//! - `HeaderTemplate` renders an optional per-document context header whose
//!   tokens are reserved out of every chunk's budget, together with the
//!   model's special tokens
mod header;
mod splitter;
mod tokenizer;

pub use header::HeaderTemplate;
pub use splitter::{split, Span};

use splitter::content_tokens;
pub use tokenizer::HfTokenCounter;

use crate::corpus::Document;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChunkError {
    #[error("Chunk size must be greater than 0")]
    InvalidChunkSize,

    #[error("Tokenizer failed: {0}")]
    Tokenizer(String),

    #[error("Tokenizer initialization failed: {0}")]
    TokenizerLoad(String),

    #[error("Header field '{0}' is missing from the document")]
    MissingHeaderField(String),

    #[error("Header and special tokens take {reserved} tokens, leaving no room in a chunk of {chunk_size}")]
    HeaderTooLong { reserved: usize, chunk_size: usize },

    #[error("Cannot split {text:?} into pieces of at most {budget} tokens")]
    Unsplittable { text: String, budget: usize },
}

/// Capability to count tokens under a specific tokenizer
pub trait TokenCounter: Send + Sync {
    /// Length of `text` as a model input, special tokens included
    fn count_tokens(&self, text: &str) -> Result<usize, ChunkError>;

    /// Special tokens the tokenizer adds to every input
    fn special_tokens(&self) -> usize {
        0
    }
}

/// A token-bounded slice of a document
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: Arc<str>,
    /// Zero-based position within the document
    pub index: usize,
    pub text: String,
    /// Byte offsets of `text` within the document body
    pub start: usize,
    pub end: usize,
    /// Tokens in `text`, excluding the header and special tokens
    pub token_count: usize,
    /// Set on the document's final chunk
    pub is_last: bool,
    pub header: Option<Arc<str>>,
    /// Document fields other than id and text
    pub metadata: Arc<Map<String, Value>>,
}

impl Chunk {
    /// Text handed to the embedding model: header followed by chunk text
    pub fn embedding_input(&self) -> String {
        match &self.header {
            Some(header) => format!("{}{}", header, self.text),
            None => self.text.clone(),
        }
    }
}

/// Splits documents into chunks of at most `chunk_size` tokens
pub struct Chunker {
    counter: Arc<dyn TokenCounter>,
    chunk_size: usize,
    header: Option<HeaderTemplate>,
}

impl Chunker {
    pub fn new(counter: Arc<dyn TokenCounter>, chunk_size: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize);
        }
        Ok(Self {
            counter,
            chunk_size,
            header: None,
        })
    }

    pub fn with_header(mut self, header: Option<HeaderTemplate>) -> Self {
        self.header = header;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn header(&self) -> Option<&HeaderTemplate> {
        self.header.as_ref()
    }

    /// Chunk a document
    ///
    /// Chunk texts concatenated in index order equal the document text.
    /// Empty and whitespace-only documents produce no chunks.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>, ChunkError> {
        if document.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let header = match &self.header {
            Some(template) => Some(template.render(&document.metadata)?),
            None => None,
        };

        // Header and special tokens come out of every chunk's budget
        let header_tokens = match &header {
            Some(h) => content_tokens(self.counter.as_ref(), h)?,
            None => 0,
        };
        let reserved = header_tokens + self.counter.special_tokens();
        if reserved >= self.chunk_size {
            return Err(ChunkError::HeaderTooLong {
                reserved,
                chunk_size: self.chunk_size,
            });
        }

        let spans = split(
            &document.text,
            self.chunk_size - reserved,
            self.counter.as_ref(),
        )?;

        let document_id: Arc<str> = Arc::from(document.id.as_str());
        let header: Option<Arc<str>> = header.map(Arc::from);
        let metadata = Arc::new(document.metadata.clone());
        let last = spans.len().saturating_sub(1);

        Ok(spans
            .into_iter()
            .enumerate()
            .map(|(index, span)| Chunk {
                document_id: Arc::clone(&document_id),
                index,
                text: document.text[span.start..span.end].to_string(),
                start: span.start,
                end: span.end,
                token_count: span.tokens,
                is_last: index == last,
                header: header.clone(),
                metadata: Arc::clone(&metadata),
            })
            .collect())
    }
}
