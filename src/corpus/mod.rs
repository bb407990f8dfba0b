//! Corpus reading
//!
//! Streams documents out of a line-delimited JSON corpus without holding more
//! than one record in memory, and groups them into fixed-size batches.

mod batches;

pub use batches::{BatchExt, Batches};

use crate::error::{LexembedError, Result};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// A single corpus document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Unique identifier
    pub id: String,
    /// Body text
    pub text: String,
    /// Every other field of the record, carried into chunk metadata
    pub metadata: Map<String, Value>,
}

/// A corpus line that could not be turned into a document
#[derive(Error, Debug)]
pub enum CorpusRecordError {
    #[error("corpus line {line}: invalid JSON: {source}")]
    InvalidJson {
        line: usize,
        source: serde_json::Error,
    },

    #[error("corpus line {line}: record is not a JSON object")]
    NotAnObject { line: usize },

    #[error("corpus line {line}: missing field '{field}'")]
    MissingField { line: usize, field: String },

    #[error("corpus line {line}: field '{field}' must be a {expected}")]
    InvalidField {
        line: usize,
        field: String,
        expected: &'static str,
    },
}

impl CorpusRecordError {
    /// One-based line number of the offending record
    pub fn line(&self) -> usize {
        match self {
            Self::InvalidJson { line, .. }
            | Self::NotAnObject { line }
            | Self::MissingField { line, .. }
            | Self::InvalidField { line, .. } => *line,
        }
    }
}

/// Names of the record fields holding the identifier and the text
#[derive(Debug, Clone)]
pub struct RecordFields {
    pub id_field: String,
    pub text_field: String,
}

impl RecordFields {
    pub fn new(id_field: impl Into<String>, text_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            text_field: text_field.into(),
        }
    }

    /// Decode one corpus line into a document
    pub fn parse(&self, line: usize, bytes: &[u8]) -> std::result::Result<Document, CorpusRecordError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|source| CorpusRecordError::InvalidJson { line, source })?;
        let Value::Object(mut record) = value else {
            return Err(CorpusRecordError::NotAnObject { line });
        };

        let id = match record.remove(&self.id_field) {
            Some(Value::String(id)) => id,
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => {
                return Err(CorpusRecordError::InvalidField {
                    line,
                    field: self.id_field.clone(),
                    expected: "string or number",
                })
            }
            None => {
                return Err(CorpusRecordError::MissingField {
                    line,
                    field: self.id_field.clone(),
                })
            }
        };

        let text = match record.remove(&self.text_field) {
            Some(Value::String(text)) => text,
            Some(_) => {
                return Err(CorpusRecordError::InvalidField {
                    line,
                    field: self.text_field.clone(),
                    expected: "string",
                })
            }
            None => {
                return Err(CorpusRecordError::MissingField {
                    line,
                    field: self.text_field.clone(),
                })
            }
        };

        Ok(Document {
            id,
            text,
            metadata: record,
        })
    }
}

/// Lazy reader over a JSONL corpus
///
/// Yields `LexembedError::CorpusRecord` for lines that cannot be decoded so the
/// caller can apply its skip/abort policy, and `LexembedError::Io` for read
/// failures, which are always fatal. Blank lines are ignored.
pub struct CorpusReader<R> {
    reader: R,
    fields: RecordFields,
    line: usize,
    buf: Vec<u8>,
    done: bool,
}

impl CorpusReader<BufReader<File>> {
    /// Open a corpus file
    pub fn open(path: &Path, fields: RecordFields) -> Result<Self> {
        if !path.exists() {
            return Err(LexembedError::CorpusNotFound {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|e| LexembedError::Io {
            source: e,
            context: format!("Failed to open corpus: {}", path.display()),
        })?;
        Ok(Self::new(BufReader::new(file), fields))
    }
}

impl<R: BufRead> CorpusReader<R> {
    pub fn new(reader: R, fields: RecordFields) -> Self {
        Self {
            reader,
            fields,
            line: 0,
            buf: Vec::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for CorpusReader<R> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                }
                Ok(_) => {
                    self.line += 1;
                    let bytes = trim_line(&self.buf);
                    if bytes.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(
                        self.fields
                            .parse(self.line, bytes)
                            .map_err(LexembedError::from),
                    );
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(LexembedError::Io {
                        source: e,
                        context: format!("Failed to read corpus line {}", self.line + 1),
                    }));
                }
            }
        }
        None
    }
}

fn trim_line(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(input: &str) -> CorpusReader<Cursor<Vec<u8>>> {
        CorpusReader::new(
            Cursor::new(input.as_bytes().to_vec()),
            RecordFields::new("version_id", "text"),
        )
    }

    #[test]
    fn test_reads_documents_in_order() {
        let input = concat!(
            r#"{"version_id": "a", "text": "first", "type": "bill"}"#,
            "\n",
            r#"{"version_id": "b", "text": "second"}"#,
            "\n"
        );

        let docs: Vec<Document> = reader(input).map(|d| d.unwrap()).collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a");
        assert_eq!(docs[0].text, "first");
        assert_eq!(docs[0].metadata["type"], "bill");
        assert!(!docs[0].metadata.contains_key("text"));
        assert_eq!(docs[1].id, "b");
    }

    #[test]
    fn test_skips_blank_lines_and_handles_missing_newline() {
        let input = "\n{\"version_id\": 7, \"text\": \"x\"}\r\n\n{\"version_id\": \"z\", \"text\": \"y\"}";
        let docs: Vec<Document> = reader(input).map(|d| d.unwrap()).collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "7");
        assert_eq!(docs[1].id, "z");
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let input = "{\"version_id\": \"a\", \"text\": \"ok\"}\n{not json\n{\"version_id\": \"c\", \"text\": \"ok\"}\n";
        let results: Vec<_> = reader(input).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(LexembedError::CorpusRecord(e)) => assert_eq!(e.line(), 2),
            other => panic!("expected record error, got {:?}", other),
        }
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        let fields = RecordFields::new("version_id", "text");

        let missing = fields.parse(1, br#"{"text": "x"}"#).unwrap_err();
        assert!(matches!(missing, CorpusRecordError::MissingField { .. }));

        let invalid = fields
            .parse(2, br#"{"version_id": "a", "text": 3}"#)
            .unwrap_err();
        assert!(matches!(invalid, CorpusRecordError::InvalidField { .. }));

        let array = fields.parse(3, b"[1, 2]").unwrap_err();
        assert!(matches!(array, CorpusRecordError::NotAnObject { line: 3 }));
    }

    #[test]
    fn test_open_missing_corpus() {
        let result = CorpusReader::open(
            Path::new("/nonexistent/corpus.jsonl"),
            RecordFields::new("id", "text"),
        );
        assert!(matches!(result, Err(LexembedError::CorpusNotFound { .. })));
    }
}
