//! Per-document context header
//!
//! The header is rendered from document metadata and prepended to every
//! chunk before embedding, giving the model context the chunk text alone
//! may lack (title, jurisdiction, document type).

use super::ChunkError;
use crate::config::HeaderConfig;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Compiled header template
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    source: String,
    segments: Vec<Segment>,
    mappings: BTreeMap<String, BTreeMap<String, String>>,
}

impl HeaderTemplate {
    pub fn new(template: &str, mappings: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_string()));
            }
            segments.push(Segment::Field(name.as_str().to_string()));
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_string()));
        }

        Self {
            source: template.to_string(),
            segments,
            mappings,
        }
    }

    /// Build the template from configuration; `None` when disabled
    pub fn from_config(config: &HeaderConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(&config.template, config.mappings.clone()))
    }

    /// The raw template text
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn mappings(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.mappings
    }

    /// Field names referenced by the template, in order of appearance
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render the header for a document's metadata
    ///
    /// Values with a configured mapping are translated; unmapped values are
    /// used as they appear in the record.
    pub fn render(&self, metadata: &Map<String, Value>) -> Result<String, ChunkError> {
        let mut out = String::with_capacity(self.source.len() + 64);

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let raw = match metadata.get(name) {
                        None | Some(Value::Null) => {
                            return Err(ChunkError::MissingHeaderField(name.clone()))
                        }
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                    };
                    let value = self
                        .mappings
                        .get(name)
                        .and_then(|map| map.get(&raw))
                        .cloned()
                        .unwrap_or(raw);
                    out.push_str(&value);
                }
            }
        }

        Ok(out)
    }
}
