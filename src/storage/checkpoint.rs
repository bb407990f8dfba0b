//! Resume point detection
//!
//! A document counts as done only once all of its chunks are present in all
//! three data files. The scan finds the longest prefix of the files made of
//! whole documents; anything beyond it is left over from an interrupted run.
use super::OutputStore;
use crate::error::{LexembedError, Result};
use ahash::AHashSet;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use tracing::{debug, warn};

/// The fields of a metadata line the scan needs
#[derive(Deserialize)]
struct RecordHead {
    document_id: String,
    chunk_index: usize,
    is_last_chunk: bool,
}

/// A document's contiguous lines in the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRun {
    pub document_id: String,
    pub lines: usize,
}

/// Newline-terminated line ends of one file
struct LineIndex {
    ends: Vec<u64>,
    len: u64,
}

impl LineIndex {
    fn build(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Self {
                    ends: Vec::new(),
                    len: 0,
                })
            }
            Err(e) => {
                return Err(LexembedError::io(
                    e,
                    format!("Failed to open {}", path.display()),
                ))
            }
        };

        let mut reader = BufReader::with_capacity(1 << 16, file);
        let mut ends = Vec::new();
        let mut pos = 0u64;
        loop {
            let buf = reader
                .fill_buf()
                .map_err(|e| LexembedError::io(e, format!("Failed to read {}", path.display())))?;
            if buf.is_empty() {
                break;
            }
            for (i, byte) in buf.iter().enumerate() {
                if *byte == b'\n' {
                    ends.push(pos + i as u64 + 1);
                }
            }
            let n = buf.len();
            pos += n as u64;
            reader.consume(n);
        }

        Ok(Self { ends, len: pos })
    }

    /// Byte offset just past the first `lines` lines
    fn offset_after(&self, lines: usize) -> u64 {
        match lines {
            0 => 0,
            n => self.ends[n - 1],
        }
    }
}

/// Documents durably present in an output directory
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    runs: Vec<DocumentRun>,
    completed: AHashSet<String>,
    valid_lines: usize,
    /// End of the valid prefix per data file (embeddings, metadatas, texts)
    valid_bytes: [u64; 3],
    file_bytes: [u64; 3],
    file_lines: [usize; 3],
}

impl Checkpoint {
    /// Scan the data files of `store` without modifying them
    pub fn scan(store: &OutputStore) -> Result<Self> {
        let [embeddings_path, metadatas_path, texts_path] = store.data_paths();
        let embeddings = LineIndex::build(&embeddings_path)?;
        let metadatas = LineIndex::build(&metadatas_path)?;
        let texts = LineIndex::build(&texts_path)?;

        let limit = embeddings
            .ends
            .len()
            .min(metadatas.ends.len())
            .min(texts.ends.len());

        let mut checkpoint = Checkpoint {
            file_bytes: [embeddings.len, metadatas.len, texts.len],
            file_lines: [
                embeddings.ends.len(),
                metadatas.ends.len(),
                texts.ends.len(),
            ],
            ..Default::default()
        };

        if limit > 0 {
            checkpoint.scan_metadata(&metadatas_path, limit)?;
        }

        let valid = checkpoint.valid_lines;
        checkpoint.valid_bytes = [
            embeddings.offset_after(valid),
            metadatas.offset_after(valid),
            texts.offset_after(valid),
        ];

        debug!(
            "Checkpoint: {} documents in {} lines ({} dirty)",
            checkpoint.completed.len(),
            valid,
            checkpoint.discarded_lines()
        );

        Ok(checkpoint)
    }

    fn scan_metadata(&mut self, path: &Path, limit: usize) -> Result<()> {
        let file = File::open(path)
            .map_err(|e| LexembedError::io(e, format!("Failed to open {}", path.display())))?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut current: Option<DocumentRun> = None;

        for line_no in 0..limit {
            line.clear();
            reader
                .read_until(b'\n', &mut line)
                .map_err(|e| LexembedError::io(e, format!("Failed to read {}", path.display())))?;

            let head: RecordHead = match serde_json::from_slice(&line) {
                Ok(head) => head,
                Err(e) => {
                    warn!(
                        "Unreadable metadata at line {} of {}: {}",
                        line_no + 1,
                        path.display(),
                        e
                    );
                    break;
                }
            };

            let run = current.get_or_insert_with(|| DocumentRun {
                document_id: head.document_id.clone(),
                lines: 0,
            });
            if run.document_id != head.document_id || run.lines != head.chunk_index {
                warn!(
                    "Out-of-sequence chunk {} of {} at line {} of {}",
                    head.chunk_index,
                    head.document_id,
                    line_no + 1,
                    path.display()
                );
                break;
            }
            run.lines += 1;

            if head.is_last_chunk {
                if let Some(run) = current.take() {
                    if !self.completed.insert(run.document_id.clone()) {
                        warn!("Document {} appears more than once in the output", run.document_id);
                    }
                    self.runs.push(run);
                    self.valid_lines = line_no + 1;
                }
            }
        }

        Ok(())
    }

    /// Whether the document is fully present
    pub fn contains(&self, document_id: &str) -> bool {
        self.completed.contains(document_id)
    }

    pub fn completed(&self) -> &AHashSet<String> {
        &self.completed
    }

    pub fn into_completed(self) -> AHashSet<String> {
        self.completed
    }

    /// Completed documents in output order
    pub fn runs(&self) -> &[DocumentRun] {
        &self.runs
    }

    pub fn document_count(&self) -> usize {
        self.completed.len()
    }

    /// Lines (chunks) in the valid prefix
    pub fn valid_lines(&self) -> usize {
        self.valid_lines
    }

    /// Valid prefix length of each data file: embeddings, metadatas, texts
    pub fn valid_bytes(&self) -> [u64; 3] {
        self.valid_bytes
    }

    /// Whether any data file extends past the valid prefix
    pub fn is_dirty(&self) -> bool {
        self.file_bytes != self.valid_bytes
    }

    /// Complete lines past the valid prefix in the longest data file
    pub fn discarded_lines(&self) -> usize {
        self.file_lines
            .iter()
            .map(|lines| lines.saturating_sub(self.valid_lines))
            .max()
            .unwrap_or(0)
    }
}
