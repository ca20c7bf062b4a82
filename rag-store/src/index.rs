//! The seam between retrieval logic and the concrete index.

use std::future::Future;
use std::pin::Pin;

use qdrant_client::qdrant::Filter;

use crate::config::DistanceKind;
use crate::errors::RagError;
use crate::record::RawHit;

pub type IndexFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RagError>> + Send + 'a>>;

/// Nearest-neighbour request.
#[derive(Clone, Debug)]
pub struct VectorSearch<'a> {
    pub vector: &'a [f32],
    pub limit: usize,
    pub filter: Option<&'a Filter>,
}

/// Full-text candidate request: points whose `text` contains any term.
#[derive(Clone, Debug)]
pub struct KeywordSearch<'a> {
    pub terms: &'a [String],
    pub limit: usize,
    pub filter: Option<&'a Filter>,
}

/// A searchable store of chunks.
///
/// Implemented by [`crate::qdrant_facade::QdrantFacade`] and by in-memory
/// fakes in tests.
pub trait SearchIndex: Send + Sync {
    /// Distance function of the underlying vectors.
    fn distance(&self) -> DistanceKind;

    /// Raw nearest neighbours, best first.
    fn vector_search<'a>(&'a self, req: VectorSearch<'a>) -> IndexFuture<'a, Vec<RawHit>>;

    /// Unscored candidates matching at least one term.
    fn keyword_search<'a>(&'a self, req: KeywordSearch<'a>) -> IndexFuture<'a, Vec<RawHit>>;

    /// Cheap liveness check.
    fn ping(&self) -> IndexFuture<'_, ()>;
}
