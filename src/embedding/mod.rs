//! Embedding generation
//!
//! Architecture:
//! - EmbeddingProvider trait for abstraction over the model
//! - FastEmbedProvider for local embedding (BAAI/bge-small-en-v1.5, 384-dim, by default)
//! - ChunkBatcher + EmbeddingStage for bounded, order-preserving batch submission
mod batch;
mod provider;

pub use batch::{ChunkBatcher, EmbeddedChunk, EmbeddingStage};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider, ProviderOptions};
