//! Score normalization and lexical scoring.
//!
//! Every score leaving this crate lies in `[0, 1]`:
//! - cosine / dot similarities are clamped;
//! - Euclid distances map to `1 / (1 + d)`;
//! - keyword scores are divided by the batch maximum when it exceeds 1.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::config::DistanceKind;
use crate::record::DocumentChunk;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "of", "on", "or", "the", "to", "what", "when", "where", "which", "who",
    "why", "with",
];

/// Maps a raw vector score into `[0, 1]`.
pub fn normalize_vector_score(raw: f32, distance: DistanceKind) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    match distance {
        DistanceKind::Cosine | DistanceKind::Dot => raw.clamp(0.0, 1.0),
        DistanceKind::Euclid => 1.0 / (1.0 + raw.max(0.0)),
    }
}

/// Divides every score by the batch maximum when that maximum exceeds 1.
pub fn normalize_keyword_scores(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(0.0f32, f32::max);
    if max > 1.0 {
        for s in scores.iter_mut() {
            *s /= max;
        }
    }
    for s in scores.iter_mut() {
        *s = if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 };
    }
}

/// `w * vector + (1 - w) * keyword`, both already normalized.
pub fn hybrid_score(vector: f32, keyword: f32, vector_weight: f32) -> f32 {
    let w = vector_weight.clamp(0.0, 1.0);
    (w * vector + (1.0 - w) * keyword).clamp(0.0, 1.0)
}

/// Lowercased alphanumeric terms, stopwords and single characters removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Raw lexical scores of `docs` against `query`, IDF-weighted over the batch.
///
/// Each distinct query term present in a document adds
/// `idf * tf / (tf + 1)` with `idf = 1 + ln(1 + n_docs / df)`.
/// Results are not normalized.
pub fn keyword_scores(query: &str, docs: &[&str]) -> Vec<f32> {
    let terms: HashSet<String> = tokenize(query).into_iter().collect();
    if terms.is_empty() || docs.is_empty() {
        return vec![0.0; docs.len()];
    }

    let doc_terms: Vec<HashMap<String, u32>> = docs
        .iter()
        .map(|d| {
            let mut tf = HashMap::new();
            for t in tokenize(d) {
                if terms.contains(&t) {
                    *tf.entry(t).or_insert(0) += 1;
                }
            }
            tf
        })
        .collect();

    let mut df: HashMap<&str, usize> = HashMap::new();
    for tf in &doc_terms {
        for t in tf.keys() {
            *df.entry(t.as_str()).or_insert(0) += 1;
        }
    }

    let n_docs = docs.len() as f32;
    doc_terms
        .iter()
        .map(|tf| {
            tf.iter()
                .map(|(t, &count)| {
                    let dfi = *df.get(t.as_str()).unwrap_or(&1) as f32;
                    let idf = 1.0 + (1.0 + n_docs / dfi).ln();
                    idf * count as f32 / (count as f32 + 1.0)
                })
                .sum()
        })
        .collect()
}

/// Descending score, ties broken by ascending id.
pub fn rank_order(a: &DocumentChunk, b: &DocumentChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}
