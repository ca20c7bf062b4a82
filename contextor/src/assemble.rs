//! Context assembly: merge overlapping chunks, then fit the character budget.
//!
//! Input order does not matter; chunks are put in rank order (score desc,
//! id asc) first, so the same set and budget always give the same context.

use rag_store::DocumentChunk;
use serde::Serialize;
use tracing::debug;

/// Why a retrieved chunk is not in the context on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "into", rename_all = "snake_case")]
pub enum DropReason {
    /// Folded into the chunk with this id.
    MergedInto(String),
    OverBudget,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DroppedChunk {
    pub id: String,
    #[serde(flatten)]
    pub reason: DropReason,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssembledContext {
    /// Rank order.
    pub chunks: Vec<DocumentChunk>,
    pub dropped: Vec<DroppedChunk>,
    /// The top chunk alone exceeded the budget and was cut.
    pub truncated: bool,
}

impl AssembledContext {
    pub fn total_chars(&self) -> usize {
        self.chunks.iter().map(|c| c.text.chars().count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

struct Group {
    chunk: DocumentChunk,
    absorbed: Vec<String>,
}

/// Merges overlapping chunks of one source and keeps the best of them
/// within `max_chars`.
///
/// Overlap means intersecting spans when both chunks carry one; otherwise
/// the last `chunk_overlap` chars of one equal the first `chunk_overlap`
/// chars of the other. A merged chunk keeps the id of its best-ranked member,
/// the max score and the union span.
pub fn assemble(chunks: &[DocumentChunk], max_chars: usize, chunk_overlap: usize) -> AssembledContext {
    let mut groups: Vec<Group> = chunks
        .iter()
        .cloned()
        .map(|chunk| Group {
            chunk,
            absorbed: Vec::new(),
        })
        .collect();
    groups.sort_by(|a, b| rank_cmp(&a.chunk, &b.chunk));

    'merge: loop {
        for i in 0..groups.len() {
            for j in 0..groups.len() {
                if i == j {
                    continue;
                }
                let Some(merged) = try_merge(&groups[i].chunk, &groups[j].chunk, chunk_overlap)
                else {
                    continue;
                };
                let hi = groups.remove(i.max(j));
                let lo = groups.remove(i.min(j));
                let mut absorbed: Vec<String> = lo.absorbed.into_iter().chain(hi.absorbed).collect();
                for id in [lo.chunk.id, hi.chunk.id] {
                    if id != merged.id {
                        absorbed.push(id);
                    }
                }
                groups.push(Group {
                    chunk: merged,
                    absorbed,
                });
                groups.sort_by(|a, b| rank_cmp(&a.chunk, &b.chunk));
                continue 'merge;
            }
        }
        break;
    }

    let mut out = AssembledContext::default();
    let mut used = 0usize;
    let mut over = false;

    for (idx, g) in groups.into_iter().enumerate() {
        for id in g.absorbed {
            out.dropped.push(DroppedChunk {
                id,
                reason: DropReason::MergedInto(g.chunk.id.clone()),
            });
        }

        let mut chunk = g.chunk;
        let len = chunk.text.chars().count();
        if !over && used + len <= max_chars {
            used += len;
            out.chunks.push(chunk);
        } else if idx == 0 {
            chunk.text = truncate_chars(&chunk.text, max_chars).to_string();
            used = max_chars;
            out.truncated = true;
            out.chunks.push(chunk);
        } else {
            over = true;
            out.dropped.push(DroppedChunk {
                id: chunk.id,
                reason: DropReason::OverBudget,
            });
        }
    }

    out.dropped.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(
        kept = out.chunks.len(),
        dropped = out.dropped.len(),
        chars = used,
        truncated = out.truncated,
        "context assembled"
    );
    out
}

fn rank_cmp(a: &DocumentChunk, b: &DocumentChunk) -> std::cmp::Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Merges `b` onto the end of `a` if `b` continues `a`.
fn try_merge(a: &DocumentChunk, b: &DocumentChunk, overlap: usize) -> Option<DocumentChunk> {
    if a.source != b.source {
        return None;
    }

    let (text, span) = match (a.span, b.span) {
        (Some(sa), Some(sb)) => {
            if !sa.intersects(&sb) || (sa.start, sa.end) > (sb.start, sb.end) {
                return None;
            }
            let text = if sb.end <= sa.end {
                a.text.clone()
            } else {
                let skip = sa.end.saturating_sub(sb.start);
                let mut t = a.text.clone();
                t.extend(b.text.chars().skip(skip));
                t
            };
            (text, Some(sa.union(&sb)))
        }
        (None, None) => {
            if overlap == 0 {
                return None;
            }
            let head: String = b.text.chars().take(overlap).collect();
            if head.chars().count() < overlap || !a.text.ends_with(&head) {
                return None;
            }
            let mut t = a.text.clone();
            t.extend(b.text.chars().skip(overlap));
            (t, None)
        }
        _ => return None,
    };

    let lead = if rank_cmp(a, b).is_le() { a } else { b };
    Some(DocumentChunk {
        id: lead.id.clone(),
        text,
        source: a.source.clone(),
        span,
        metadata: lead.metadata.clone(),
        score: a.score.max(b.score),
    })
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}
