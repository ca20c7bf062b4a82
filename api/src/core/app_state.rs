use std::sync::Arc;

use contextor::RagService;

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RagService>,
}

impl AppState {
    pub fn new(service: Arc<RagService>) -> Self {
        Self { service }
    }
}
