//! Query embedding. The numerical model is a black box behind
//! [`EmbeddingsProvider`]; [`service::ServiceEmbedder`] is the production
//! implementation over the shared LLM service.

use crate::errors::RagError;
use std::{future::Future, pin::Pin};

pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>, RagError>> + Send + 'a>>;

/// `encode(text) -> vector`. Failures surface as [`RagError::Embedding`]
/// or [`RagError::CallTimeout`].
pub trait EmbeddingsProvider: Send + Sync {
    fn embed<'a>(&'a self, text: &'a str) -> EmbedFuture<'a>;
}

pub mod service;
