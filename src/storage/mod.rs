//! Output directory management
//!
//! The output directory holds three line-aligned JSONL files (line `i` of
//! each describes the same chunk) and a manifest freezing the settings the
//! data was produced with:
//!
//! - `embeddings.jsonl`: one JSON array of floats per chunk
//! - `texts.jsonl`: one JSON string per chunk, without header
//! - `metadatas.jsonl`: one JSON object per chunk (see `ChunkRecord`)
//! - `version.json`: the `Manifest`

pub mod checkpoint;
pub mod writer;

pub use checkpoint::{Checkpoint, DocumentRun};
pub use writer::{ChunkRecord, OutputWriter};

use crate::error::{LexembedError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const EMBEDDINGS_FILE: &str = "embeddings.jsonl";
pub const METADATAS_FILE: &str = "metadatas.jsonl";
pub const TEXTS_FILE: &str = "texts.jsonl";
pub const MANIFEST_FILE: &str = "version.json";

/// Version of the on-disk layout
pub const FORMAT_VERSION: u32 = 1;

/// Settings that determine the content of the output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub model: String,
    pub dimension: usize,
    pub chunk_size: usize,
    pub header_template: Option<String>,
    /// Value mappings applied while rendering the header
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header_mappings: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub created_at: String,
}

impl Manifest {
    pub fn new(
        model: impl Into<String>,
        dimension: usize,
        chunk_size: usize,
        header_template: Option<String>,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            model: model.into(),
            dimension,
            chunk_size,
            header_template,
            header_mappings: BTreeMap::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_header_mappings(
        mut self,
        mappings: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        self.header_mappings = mappings;
        self
    }

    /// Whether data produced under `other` can be extended under `self`
    pub fn is_compatible(&self, other: &Manifest) -> bool {
        self.format_version == other.format_version
            && self.model == other.model
            && self.dimension == other.dimension
            && self.chunk_size == other.chunk_size
            && self.header_template == other.header_template
            && self.header_mappings == other.header_mappings
    }
}

/// A chunk as stored in the output directory
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub is_last_chunk: bool,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// Handle on an output directory
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
}

impl OutputStore {
    /// Open (creating if needed) an output directory for a run
    ///
    /// Existing data produced under an incompatible manifest is discarded.
    pub fn open(dir: &Path, manifest: &Manifest) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| LexembedError::Io {
            source: e,
            context: format!("Failed to create output directory: {}", dir.display()),
        })?;
        let store = Self {
            dir: dir.to_path_buf(),
        };

        match store.read_manifest()? {
            Some(existing) if existing.is_compatible(manifest) => {}
            Some(existing) => {
                tracing::warn!(
                    "Output in {} was produced with model {} (chunk size {}); discarding it",
                    dir.display(),
                    existing.model,
                    existing.chunk_size
                );
                store.reset()?;
                store.write_manifest(manifest)?;
            }
            None => store.write_manifest(manifest)?,
        }

        for path in store.data_paths() {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| LexembedError::Io {
                    source: e,
                    context: format!("Failed to create data file: {}", path.display()),
                })?;
        }

        Ok(store)
    }

    /// Open an existing output directory without modifying it
    pub fn open_existing(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(LexembedError::Config(format!(
                "Output directory not found: {}",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.dir.join(EMBEDDINGS_FILE)
    }

    pub fn metadatas_path(&self) -> PathBuf {
        self.dir.join(METADATAS_FILE)
    }

    pub fn texts_path(&self) -> PathBuf {
        self.dir.join(TEXTS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Data files in a fixed order: embeddings, metadatas, texts
    pub fn data_paths(&self) -> [PathBuf; 3] {
        [
            self.embeddings_path(),
            self.metadatas_path(),
            self.texts_path(),
        ]
    }

    pub fn read_manifest(&self) -> Result<Option<Manifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| LexembedError::Io {
            source: e,
            context: format!("Failed to read manifest: {}", path.display()),
        })?;
        match serde_json::from_str(&content) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let content = serde_json::to_vec_pretty(manifest).map_err(|e| LexembedError::Json {
            source: e,
            context: "Failed to serialize manifest".to_string(),
        })?;
        write_atomic(&self.manifest_path(), &content)
    }

    /// Remove all data files
    fn reset(&self) -> Result<()> {
        for path in self.data_paths() {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| LexembedError::Io {
                    source: e,
                    context: format!("Failed to remove data file: {}", path.display()),
                })?;
            }
        }
        Ok(())
    }

    /// Cut every data file back to the end of the checkpoint's valid prefix
    ///
    /// Returns whether anything was removed.
    pub fn truncate_to(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let mut truncated = false;

        for (path, valid) in self.data_paths().iter().zip(checkpoint.valid_bytes()) {
            let len = fs::metadata(path)
                .map_err(|e| LexembedError::io(e, format!("Failed to stat {}", path.display())))?
                .len();
            if len <= valid {
                continue;
            }

            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| LexembedError::io(e, format!("Failed to open {}", path.display())))?;
            file.set_len(valid).map_err(|e| {
                LexembedError::io(e, format!("Failed to truncate {}", path.display()))
            })?;
            file.sync_all()
                .map_err(|e| LexembedError::io(e, format!("Failed to sync {}", path.display())))?;

            tracing::debug!(
                "Truncated {} from {} to {} bytes",
                path.display(),
                len,
                valid
            );
            truncated = true;
        }

        Ok(truncated)
    }

    /// Rewrite the data files without the documents `keep` rejects
    ///
    /// Only the checkpoint's valid prefix is carried over, so this also
    /// drops any partially written tail. Each file is written to a temporary
    /// sibling and renamed into place. Returns the number of documents removed.
    pub fn remove_documents<F>(&self, checkpoint: &Checkpoint, keep: F) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let mut keep_lines = Vec::with_capacity(checkpoint.valid_lines());
        let mut removed = 0;
        for run in checkpoint.runs() {
            let kept = keep(&run.document_id);
            if !kept {
                removed += 1;
            }
            keep_lines.extend(std::iter::repeat(kept).take(run.lines));
        }

        if removed == 0 {
            return Ok(0);
        }

        for path in self.data_paths() {
            filter_lines(&path, &keep_lines)?;
        }

        Ok(removed)
    }

    /// Open the data files for appending
    pub fn writer(&self, sync_writes: bool) -> Result<OutputWriter> {
        OutputWriter::open(self, sync_writes)
    }

    /// Read every stored chunk back, in file order
    pub fn read_all(&self) -> Result<Vec<StoredChunk>> {
        let open = |path: PathBuf| -> Result<std::io::Lines<BufReader<File>>> {
            let file = File::open(&path).map_err(|e| {
                LexembedError::io(e, format!("Failed to open {}", path.display()))
            })?;
            Ok(BufReader::new(file).lines())
        };

        let embeddings = open(self.embeddings_path())?;
        let metadatas = open(self.metadatas_path())?;
        let texts = open(self.texts_path())?;

        let mut chunks = Vec::new();
        for (line, ((embedding, metadata), text)) in
            embeddings.zip(metadatas).zip(texts).enumerate()
        {
            let context = || format!("Invalid output line {}", line + 1);
            let read_err = |e: std::io::Error| LexembedError::io(e, context());
            let json_err = |e: serde_json::Error| LexembedError::Json {
                source: e,
                context: context(),
            };

            let record: ChunkRecord = serde_json::from_str(&metadata.map_err(read_err)?)
                .map_err(json_err)?;
            chunks.push(StoredChunk {
                document_id: record.document_id,
                chunk_index: record.chunk_index,
                is_last_chunk: record.is_last_chunk,
                text: serde_json::from_str(&text.map_err(read_err)?).map_err(json_err)?,
                embedding: serde_json::from_str(&embedding.map_err(read_err)?)
                    .map_err(json_err)?,
                metadata: record.metadata,
            });
        }

        Ok(chunks)
    }
}

/// Write a file via a temporary sibling and rename
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = temp_sibling(path);

    let mut file = File::create(&temp_path).map_err(|e| LexembedError::Io {
        source: e,
        context: format!("Failed to create temp file: {}", temp_path.display()),
    })?;
    file.write_all(content).map_err(|e| LexembedError::Io {
        source: e,
        context: format!("Failed to write temp file: {}", temp_path.display()),
    })?;
    file.sync_all().map_err(|e| LexembedError::Io {
        source: e,
        context: format!("Failed to sync temp file: {}", temp_path.display()),
    })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| LexembedError::Io {
        source: e,
        context: format!(
            "Failed to rename {} -> {}",
            temp_path.display(),
            path.display()
        ),
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Keep line `i` of `path` iff `keep[i]`; lines past `keep` are dropped
fn filter_lines(path: &Path, keep: &[bool]) -> Result<()> {
    let temp_path = temp_sibling(path);
    let input = File::open(path)
        .map_err(|e| LexembedError::io(e, format!("Failed to open {}", path.display())))?;
    let output = File::create(&temp_path).map_err(|e| {
        LexembedError::io(e, format!("Failed to create {}", temp_path.display()))
    })?;

    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(output);
    let mut line = Vec::new();

    for &kept in keep {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| LexembedError::io(e, format!("Failed to read {}", path.display())))?;
        if n == 0 {
            break;
        }
        if kept {
            writer.write_all(&line).map_err(|e| {
                LexembedError::io(e, format!("Failed to write {}", temp_path.display()))
            })?;
        }
    }

    let file = writer.into_inner().map_err(|e| {
        LexembedError::io(e.into_error(), format!("Failed to flush {}", temp_path.display()))
    })?;
    file.sync_all()
        .map_err(|e| LexembedError::io(e, format!("Failed to sync {}", temp_path.display())))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        LexembedError::io(
            e,
            format!("Failed to rename {} -> {}", temp_path.display(), path.display()),
        )
    })
}
