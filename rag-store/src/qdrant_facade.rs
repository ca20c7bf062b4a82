//! Thin adapter around `qdrant-client` to isolate API usage.
//!
//! This facade concentrates all Qdrant interactions behind [`SearchIndex`],
//! hiding away the verbose builder pattern and keeping the rest of the
//! crate decoupled from `qdrant-client`.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, Filter, PointId, ScrollPointsBuilder, SearchParamsBuilder, SearchPointsBuilder,
    Value as QValue, point_id::PointIdOptions,
};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{DistanceKind, RagConfig};
use crate::errors::RagError;
use crate::index::{IndexFuture, KeywordSearch, SearchIndex, VectorSearch};
use crate::record::RawHit;

/// Payload field holding the chunk text; needs a full-text index for
/// keyword search.
pub const TEXT_FIELD: &str = "text";

/// A facade over the Qdrant client.
///
/// This struct encapsulates:
/// - The underlying Qdrant client.
/// - The target collection name.
/// - The distance function used in the vector space.
pub struct QdrantFacade {
    client: Qdrant,
    collection: String,
    distance: DistanceKind,
    exact: bool,
}

impl QdrantFacade {
    /// Creates a new facade from the given configuration.
    ///
    /// Uses the builder-based API of `qdrant-client` and supports optional
    /// API key authentication. No connection is made here.
    pub fn new(cfg: &RagConfig) -> Result<Self, RagError> {
        cfg.validate()?;

        let mut builder = Qdrant::from_url(&cfg.qdrant_url).timeout(cfg.call_timeout);
        if let Some(key) = &cfg.qdrant_api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build()?;

        info!(
            url = %cfg.qdrant_url,
            collection = %cfg.collection,
            distance = ?cfg.distance,
            "Qdrant client configured"
        );

        Ok(Self {
            client,
            collection: cfg.collection.clone(),
            distance: cfg.distance,
            exact: cfg.exact_search,
        })
    }

    async fn search(&self, req: VectorSearch<'_>) -> Result<Vec<RawHit>, RagError> {
        debug!(
            collection = %self.collection,
            limit = req.limit,
            filtered = req.filter.is_some(),
            exact = self.exact,
            "search_points"
        );

        let mut builder =
            SearchPointsBuilder::new(&self.collection, req.vector.to_vec(), req.limit as u64)
                .with_payload(true);
        if let Some(f) = req.filter {
            builder = builder.filter(f.clone());
        }
        if self.exact {
            builder = builder.params(SearchParamsBuilder::default().exact(true));
        }

        let res = self.client.search_points(builder).await?;
        let out: Vec<RawHit> = res
            .result
            .into_iter()
            .map(|p| RawHit {
                id: point_id_string(p.id),
                score: p.score,
                payload: payload_to_json(p.payload),
            })
            .collect();

        debug!(hits = out.len(), "search completed");
        Ok(out)
    }

    async fn scroll_text(&self, req: KeywordSearch<'_>) -> Result<Vec<RawHit>, RagError> {
        if req.terms.is_empty() {
            return Ok(Vec::new());
        }

        let should: Vec<Condition> = req
            .terms
            .iter()
            .map(|t| Condition::matches_text(TEXT_FIELD, t.clone()))
            .collect();
        let must = req.filter.map(|f| f.must.clone()).unwrap_or_default();
        let filter = Filter {
            must,
            should,
            ..Default::default()
        };

        debug!(
            collection = %self.collection,
            terms = req.terms.len(),
            limit = req.limit,
            "scroll with text match"
        );

        let res = self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.collection)
                    .filter(filter)
                    .limit(req.limit as u32)
                    .with_payload(true),
            )
            .await?;

        Ok(res
            .result
            .into_iter()
            .map(|p| RawHit {
                id: point_id_string(p.id),
                score: 0.0,
                payload: payload_to_json(p.payload),
            })
            .collect())
    }
}

impl SearchIndex for QdrantFacade {
    fn distance(&self) -> DistanceKind {
        self.distance
    }

    fn vector_search<'a>(&'a self, req: VectorSearch<'a>) -> IndexFuture<'a, Vec<RawHit>> {
        Box::pin(self.search(req))
    }

    fn keyword_search<'a>(&'a self, req: KeywordSearch<'a>) -> IndexFuture<'a, Vec<RawHit>> {
        Box::pin(self.scroll_text(req))
    }

    fn ping(&self) -> IndexFuture<'_, ()> {
        Box::pin(async move {
            let reply = self.client.health_check().await?;
            debug!(version = %reply.version, "qdrant health ok");
            Ok(())
        })
    }
}

/// Extracts the point ID in a stable string form.
fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|p| p.point_id_options) {
        Some(PointIdOptions::Uuid(s)) => s,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

/// Converts a Qdrant payload into a JSON object.
fn payload_to_json(payload: HashMap<String, QValue>) -> Map<String, Value> {
    payload
        .into_iter()
        .map(|(k, v)| (k, v.into_json()))
        .collect()
}
