//! Prompt builder: grounded-answer instructions around a numbered context block.

use rag_store::DocumentChunk;
use serde_json::Value;

/// Answer returned when retrieval finds nothing above the threshold.
pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information to answer your question. Please try rephrasing or ask a different question.";

const TEMPLATE_HEAD: &str =
    "You are a helpful AI assistant that answers questions based on the provided context.\n\nContext information:\n";

const TEMPLATE_TAIL: &str = "Please provide a comprehensive answer based on the context information. If the context doesn't contain enough information to answer the question, say so. Be accurate and helpful in your response.\n\nAnswer:";

/// Metadata keys that never reach the prompt.
const HIDDEN_KEYS: &[&str] = &["score", "chunk_id"];

/// Renders chunks as `Document N:` blocks, each followed by a `Source:` line.
///
/// # Example
/// ```
/// # use contextor::prompt::format_context;
/// # use rag_store::DocumentChunk;
/// let c = DocumentChunk {
///     id: "1".into(), text: "OpenShift is a platform.".into(), source: "intro.md".into(),
///     span: None, metadata: Default::default(), score: 0.9,
/// };
/// let ctx = format_context(&[c]);
/// assert!(ctx.starts_with("Document 1:\nOpenShift"));
/// assert!(ctx.contains("Source: intro.md"));
/// ```
pub fn format_context(chunks: &[DocumentChunk]) -> String {
    let mut out = String::new();
    for (i, c) in chunks.iter().enumerate() {
        out.push_str(&format!("Document {}:\n", i + 1));
        out.push_str(c.text.trim());
        out.push('\n');

        out.push_str("Source: ");
        out.push_str(&c.source);
        let extra: Vec<String> = c
            .metadata
            .iter()
            .filter(|(k, _)| !HIDDEN_KEYS.contains(&k.as_str()))
            .map(|(k, v)| format!("{k}: {}", scalar(v)))
            .collect();
        if !extra.is_empty() {
            out.push_str(" (");
            out.push_str(&extra.join(", "));
            out.push(')');
        }
        out.push_str("\n\n");
    }
    out
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Full prompt for `question` over already-assembled `chunks`.
pub fn build_prompt(question: &str, chunks: &[DocumentChunk]) -> String {
    let context = format_context(chunks);
    let mut out = String::with_capacity(TEMPLATE_HEAD.len() + context.len() + TEMPLATE_TAIL.len() + question.len() + 16);
    out.push_str(TEMPLATE_HEAD);
    out.push_str(context.trim_end());
    out.push_str("\n\nQuestion: ");
    out.push_str(question.trim());
    out.push_str("\n\n");
    out.push_str(TEMPLATE_TAIL);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_carries_context_and_question() {
        let mut meta = std::collections::BTreeMap::new();
        meta.insert("page".to_string(), json!(3));
        meta.insert("chunk_id".to_string(), json!("x"));
        let c = DocumentChunk {
            id: "1".into(),
            text: "  OpenShift is a Kubernetes platform. ".into(),
            source: "guide.pdf".into(),
            span: None,
            metadata: meta,
            score: 0.8,
        };

        let p = build_prompt(" What is OpenShift? ", &[c]);
        assert!(p.contains("Document 1:\nOpenShift is a Kubernetes platform.\nSource: guide.pdf (page: 3)"));
        assert!(!p.contains("chunk_id"));
        assert!(p.contains("Question: What is OpenShift?\n"));
        assert!(p.ends_with("Answer:"));
    }
}
