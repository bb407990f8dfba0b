//! Append-only writer for the three data files
use super::OutputStore;
use crate::embedding::EmbeddedChunk;
use crate::error::{LexembedError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One line of `metadatas.jsonl`
///
/// Document metadata fields are stored alongside the chunk fields; on a
/// name clash the chunk field wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub start: usize,
    pub end: usize,
    pub token_count: usize,
    pub is_last_chunk: bool,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl ChunkRecord {
    fn to_json(embedded: &EmbeddedChunk) -> Value {
        let chunk = &embedded.chunk;
        let mut object = (*chunk.metadata).clone();
        object.insert(
            "document_id".to_string(),
            Value::String(chunk.document_id.to_string()),
        );
        object.insert("chunk_index".to_string(), chunk.index.into());
        object.insert("start".to_string(), chunk.start.into());
        object.insert("end".to_string(), chunk.end.into());
        object.insert("token_count".to_string(), chunk.token_count.into());
        object.insert("is_last_chunk".to_string(), chunk.is_last.into());
        Value::Object(object)
    }
}

struct DataFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl DataFile {
    fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LexembedError::Io {
                source: e,
                context: format!("Failed to open data file: {}", path.display()),
            })?;
        Ok(Self {
            path,
            writer: BufWriter::with_capacity(1 << 16, file),
        })
    }

    fn write_line<T: serde::Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, value).map_err(|e| LexembedError::Json {
            source: e,
            context: format!("Failed to write {}", self.path.display()),
        })?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| write_error(e, &self.path))
    }

    fn flush(&mut self, sync: bool) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| write_error(e, &self.path))?;
        if sync {
            self.writer
                .get_ref()
                .sync_data()
                .map_err(|e| write_error(e, &self.path))?;
        }
        Ok(())
    }
}

fn write_error(source: std::io::Error, path: &Path) -> LexembedError {
    LexembedError::Io {
        source,
        context: format!("Failed to write {}", path.display()),
    }
}

/// Appends embedded chunks to the output directory
///
/// Every batch is flushed before `write_batch` returns, so a crash loses at
/// most the batch being written; the checkpoint scan discards its remains.
pub struct OutputWriter {
    embeddings: DataFile,
    metadatas: DataFile,
    texts: DataFile,
    sync_writes: bool,
}

impl OutputWriter {
    pub fn open(store: &OutputStore, sync_writes: bool) -> Result<Self> {
        Ok(Self {
            embeddings: DataFile::open(store.embeddings_path())?,
            metadatas: DataFile::open(store.metadatas_path())?,
            texts: DataFile::open(store.texts_path())?,
            sync_writes,
        })
    }

    /// Append one batch and flush it
    ///
    /// Returns the number of documents whose last chunk was in the batch.
    pub fn write_batch(&mut self, batch: &[EmbeddedChunk]) -> Result<usize> {
        let mut completed = 0;

        for embedded in batch {
            self.embeddings.write_line(&embedded.embedding)?;
            self.texts.write_line(&embedded.chunk.text)?;
            // Metadata goes last: its completion marker must not precede the data
            self.metadatas.write_line(&ChunkRecord::to_json(embedded))?;

            if embedded.chunk.is_last {
                completed += 1;
            }
        }

        self.embeddings.flush(self.sync_writes)?;
        self.texts.flush(self.sync_writes)?;
        self.metadatas.flush(self.sync_writes)?;
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunk;
    use crate::storage::Manifest;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn embedded(doc: &str, index: usize, text: &str, is_last: bool) -> EmbeddedChunk {
        let Value::Object(metadata) = json!({"type": "act", "start": "ignored"}) else {
            unreachable!()
        };
        EmbeddedChunk {
            chunk: Chunk {
                document_id: Arc::from(doc),
                index,
                text: text.to_string(),
                start: index * 10,
                end: index * 10 + text.len(),
                token_count: 2,
                is_last,
                header: Some(Arc::from("Title: X\n")),
                metadata: Arc::new(metadata),
            },
            embedding: vec![0.5, -1.0, index as f32],
        }
    }

    #[test]
    fn test_write_batch_aligns_files() {
        let temp = TempDir::new().unwrap();
        let store =
            OutputStore::open(temp.path(), &Manifest::new("test-model", 3, 8, None)).unwrap();
        let mut writer = store.writer(false).unwrap();

        let completed = writer
            .write_batch(&[
                embedded("d1", 0, "first\nline", false),
                embedded("d1", 1, "second", true),
                embedded("d2", 0, "third", false),
            ])
            .unwrap();
        assert_eq!(completed, 1);

        let chunks = store.read_all().unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "first\nline");
        assert_eq!(chunks[1].embedding, vec![0.5, -1.0, 1.0]);
        assert!(chunks[1].is_last_chunk);
        assert_eq!(chunks[2].document_id, "d2");
        assert_eq!(chunks[2].metadata["type"], "act");
    }

    #[test]
    fn test_chunk_fields_win_over_metadata() {
        let record = ChunkRecord::to_json(&embedded("d1", 1, "text", true));
        let record: ChunkRecord = serde_json::from_value(record).unwrap();

        assert_eq!(record.start, 10);
        assert_eq!(record.end, 14);
        assert!(!record.metadata.contains_key("start"));
        assert_eq!(record.metadata["type"], "act");
    }

    #[test]
    fn test_appends_across_writers() {
        let temp = TempDir::new().unwrap();
        let store =
            OutputStore::open(temp.path(), &Manifest::new("test-model", 3, 8, None)).unwrap();

        store
            .writer(true)
            .unwrap()
            .write_batch(&[embedded("d1", 0, "a", true)])
            .unwrap();
        store
            .writer(false)
            .unwrap()
            .write_batch(&[embedded("d2", 0, "b", true)])
            .unwrap();

        let ids: Vec<String> = store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|c| c.document_id)
            .collect();
        assert_eq!(ids, vec!["d1", "d2"]);
    }
}
