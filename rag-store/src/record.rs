//! Core data models used by the library.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SearchMode;
use crate::filters::MetadataFilters;

/// Placeholder source for chunks whose payload names none.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Half-open character range `[start, end)` inside the source document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn intersects(&self, other: &CharSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn union(&self, other: &CharSpan) -> CharSpan {
        CharSpan {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A retrieved passage with a normalized score in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<CharSpan>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub score: f32,
}

/// Ranked chunks plus timing of the retrieval call.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalResult {
    /// Descending score, ties by ascending id.
    pub chunks: Vec<DocumentChunk>,
    pub retrieval_time_ms: u64,
    pub search_mode: SearchMode,
    /// Index calls made, including retries.
    pub attempts: u32,
}

/// Parameters of one retrieval.
#[derive(Clone, Copy, Debug)]
pub struct RagQuery<'a> {
    pub text: &'a str,
    /// Required for vector and hybrid modes.
    pub vector: Option<&'a [f32]>,
    pub top_k: usize,
    pub filters: &'a MetadataFilters,
    /// Overrides the configured mode.
    pub mode: Option<SearchMode>,
    /// Overrides the configured threshold.
    pub similarity_threshold: Option<f32>,
    /// No retry starts past this instant.
    pub deadline: Option<tokio::time::Instant>,
}

/// A point as returned by the index, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct RawHit {
    pub id: String,
    /// Raw similarity (or distance for Euclid). `0.0` for keyword candidates.
    pub score: f32,
    pub payload: Map<String, Value>,
}

impl RawHit {
    /// Maps payload fields onto a chunk.
    ///
    /// `text` is the passage, `source` falls back to `document_name` and
    /// `filename`, `start_char`/`end_char` form the span, and every other
    /// scalar field becomes metadata.
    pub fn into_chunk(self, score: f32) -> DocumentChunk {
        let mut payload = self.payload;

        let text = take_string(&mut payload, "text").unwrap_or_default();
        let source = ["source", "document_name", "filename"]
            .iter()
            .find_map(|k| take_string(&mut payload, k).filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

        let start = payload.remove("start_char").and_then(|v| v.as_u64());
        let end = payload.remove("end_char").and_then(|v| v.as_u64());
        let span = match (start, end) {
            (Some(s), Some(e)) if e > s => Some(CharSpan {
                start: s as usize,
                end: e as usize,
            }),
            _ => None,
        };

        let metadata = payload
            .into_iter()
            .filter(|(_, v)| !(v.is_null() || v.is_object() || v.is_array()))
            .collect();

        DocumentChunk {
            id: self.id,
            text,
            source,
            span,
            metadata,
            score,
        }
    }
}

fn take_string(payload: &mut Map<String, Value>, key: &str) -> Option<String> {
    match payload.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            payload.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}
