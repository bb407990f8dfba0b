//! Lexembed - Resumable Chunk-and-Embed Pipeline
//!
//! Reads a JSONL corpus of legal documents, splits each document into chunks
//! of bounded token length, embeds the chunks with a local sentence-embedding
//! model and appends texts, metadata and vectors to an output directory that
//! can be resumed after interruption.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod pipeline;
pub mod storage;

pub use error::{LexembedError, Result};
