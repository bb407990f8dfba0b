//! Corpus reading on a blocking task
use crate::config::ErrorPolicy;
use crate::corpus::{BatchExt, CorpusReader, Document, RecordFields};
use crate::error::{LexembedError, Result};
use ahash::AHashSet;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::warn;

/// Record counts from one pass over the corpus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub seen: usize,
    pub already_present: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

/// Send batches of documents that still need processing
///
/// Documents in `completed` and repeated ids are skipped. Malformed records
/// follow `policy`; under `Abort` the documents read before the bad record
/// are still sent. Returns early once the receiver is gone.
pub fn read_corpus(
    path: &Path,
    fields: RecordFields,
    policy: ErrorPolicy,
    batch_size: usize,
    completed: AHashSet<String>,
    tx: mpsc::Sender<Vec<Document>>,
) -> Result<ReadStats> {
    let mut reader = CorpusReader::open(path, fields)?;
    let mut stats = ReadStats::default();
    let mut emitted: AHashSet<String> = AHashSet::new();
    let mut failure: Option<LexembedError> = None;

    let documents = std::iter::from_fn(|| {
        if failure.is_some() {
            return None;
        }
        for record in reader.by_ref() {
            match record {
                Ok(document) => {
                    stats.seen += 1;
                    if completed.contains(&document.id) {
                        stats.already_present += 1;
                        continue;
                    }
                    if !emitted.insert(document.id.clone()) {
                        warn!(
                            "Duplicate document id {}; keeping the first occurrence",
                            document.id
                        );
                        stats.duplicates += 1;
                        continue;
                    }
                    return Some(document);
                }
                Err(LexembedError::CorpusRecord(e)) if policy == ErrorPolicy::Skip => {
                    warn!("Skipping malformed record: {}", e);
                    stats.malformed += 1;
                }
                Err(e) => {
                    failure = Some(e);
                    return None;
                }
            }
        }
        None
    });

    for batch in documents.batches(batch_size) {
        if tx.blocking_send(batch).is_err() {
            break;
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

/// Ids of every well-formed record in the corpus
pub fn corpus_ids(path: &Path, fields: RecordFields) -> Result<AHashSet<String>> {
    let mut ids = AHashSet::new();
    for record in CorpusReader::open(path, fields)? {
        match record {
            Ok(document) => {
                ids.insert(document.id);
            }
            Err(LexembedError::CorpusRecord(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn corpus(temp: &TempDir, lines: &[&str]) -> std::path::PathBuf {
        let path = temp.path().join("corpus.jsonl");
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn fields() -> RecordFields {
        RecordFields::new("version_id", "text")
    }

    #[test]
    fn test_skips_completed_and_duplicates() {
        let temp = TempDir::new().unwrap();
        let path = corpus(
            &temp,
            &[
                r#"{"version_id": "a", "text": "one"}"#,
                r#"{"version_id": "b", "text": "two"}"#,
                r#"{"version_id": "b", "text": "again"}"#,
                r#"{"version_id": "c", "text": "three"}"#,
            ],
        );

        let (tx, mut rx) = mpsc::channel(8);
        let completed: AHashSet<String> = ["a".to_string()].into_iter().collect();
        let stats = read_corpus(&path, fields(), ErrorPolicy::Skip, 10, completed, tx).unwrap();

        assert_eq!(
            stats,
            ReadStats {
                seen: 4,
                already_present: 1,
                duplicates: 1,
                malformed: 0,
            }
        );
        let batch = rx.try_recv().unwrap();
        let ids: Vec<&str> = batch.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(batch[0].text, "two");
    }

    #[test]
    fn test_malformed_skip_and_abort() {
        let temp = TempDir::new().unwrap();
        let path = corpus(
            &temp,
            &[
                r#"{"version_id": "a", "text": "one"}"#,
                "{not json",
                r#"{"version_id": "b", "text": "two"}"#,
            ],
        );

        let (tx, mut rx) = mpsc::channel(8);
        let stats =
            read_corpus(&path, fields(), ErrorPolicy::Skip, 1, AHashSet::new(), tx).unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.seen, 2);
        assert_eq!(rx.try_recv().unwrap()[0].id, "a");
        assert_eq!(rx.try_recv().unwrap()[0].id, "b");

        let (tx, mut rx) = mpsc::channel(8);
        let result = read_corpus(&path, fields(), ErrorPolicy::Abort, 1, AHashSet::new(), tx);
        assert!(matches!(result, Err(LexembedError::CorpusRecord(_))));
        assert_eq!(rx.try_recv().unwrap()[0].id, "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stops_when_receiver_dropped() {
        let temp = TempDir::new().unwrap();
        let path = corpus(
            &temp,
            &[
                r#"{"version_id": "a", "text": "one"}"#,
                r#"{"version_id": "b", "text": "two"}"#,
            ],
        );

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let stats =
            read_corpus(&path, fields(), ErrorPolicy::Skip, 1, AHashSet::new(), tx).unwrap();
        assert_eq!(stats.seen, 1);
    }

    #[test]
    fn test_corpus_ids_ignore_malformed() {
        let temp = TempDir::new().unwrap();
        let path = corpus(
            &temp,
            &[r#"{"version_id": 7, "text": "x"}"#, "[]", r#"{"text": "no id"}"#],
        );

        let ids = corpus_ids(&path, fields()).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("7"));
    }
}
