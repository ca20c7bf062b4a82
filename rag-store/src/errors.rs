//! Unified error types for the crate.

use std::time::Duration;

use qdrant_client::QdrantError;
use thiserror::Error;

/// Top-level error for rag-store operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid or unsupported configuration.
    #[error("[RAG Store] config error: {0}")]
    Config(String),

    /// Metadata filters violated a bound (key count, key shape, value size).
    #[error("[RAG Store] invalid filter: {0}")]
    InvalidFilter(String),

    /// Query vector does not match the collection dimensionality.
    #[error("[RAG Store] vector size mismatch: got {got}, want {want}")]
    VectorSizeMismatch { got: usize, want: usize },

    /// The embedding backend failed.
    #[error("[RAG Store] embedding failed: {0}")]
    Embedding(String),

    /// One index call could not reach Qdrant, or Qdrant asked to back off.
    #[error("[RAG Store] qdrant error: {0}")]
    Qdrant(String),

    /// Qdrant refused the request itself (missing collection, bad filter
    /// field, ...). Repeating it cannot succeed.
    #[error("[RAG Store] qdrant rejected the request: {0}")]
    Rejected(String),

    /// One index call exceeded its own timeout.
    #[error("[RAG Store] index call timed out after {0:?}")]
    CallTimeout(Duration),

    /// Retrieval gave up and the final attempt had timed out.
    #[error("[RAG Store] retrieval timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// Retrieval gave up on connection failures.
    #[error("[RAG Store] index unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl RagError {
    /// Per-call failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Qdrant(_) | RagError::CallTimeout(_))
    }
}

// gRPC status codes worth another attempt.
const GRPC_ABORTED: i32 = 10;
const GRPC_DEADLINE_EXCEEDED: i32 = 4;
const GRPC_RESOURCE_EXHAUSTED: i32 = 8;
const GRPC_UNAVAILABLE: i32 = 14;

fn from_grpc(code: i32, message: String) -> RagError {
    match code {
        GRPC_UNAVAILABLE | GRPC_DEADLINE_EXCEEDED | GRPC_RESOURCE_EXHAUSTED | GRPC_ABORTED => {
            RagError::Qdrant(message)
        }
        _ => RagError::Rejected(message),
    }
}

impl From<QdrantError> for RagError {
    fn from(e: QdrantError) -> Self {
        let code = match &e {
            QdrantError::ResponseError { status }
            | QdrantError::ResourceExhaustedError { status, .. } => Some(i32::from(status.code())),
            _ => None,
        };
        match (code, e) {
            (Some(code), e) => from_grpc(code, e.to_string()),
            (None, e @ QdrantError::Io(_)) => RagError::Qdrant(e.to_string()),
            (None, e) => RagError::Rejected(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_and_timeout_classes_are_transient() {
        assert!(from_grpc(GRPC_UNAVAILABLE, "tcp connect error".into()).is_transient());
        assert!(from_grpc(GRPC_DEADLINE_EXCEEDED, "deadline".into()).is_transient());

        let missing = from_grpc(5, "Not found: Collection `docs` doesn't exist!".into());
        assert!(matches!(missing, RagError::Rejected(_)));
        assert!(!missing.is_transient());
        assert!(!from_grpc(3, "bad filter field type".into()).is_transient());
    }

    #[test]
    fn client_side_errors_keep_their_class() {
        let io = QdrantError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(RagError::from(io).is_transient());

        let conv = QdrantError::ConversionError("sparse into dense".into());
        assert!(matches!(RagError::from(conv), RagError::Rejected(_)));
    }
}
