//! Stage reporting for the query pipeline.
//!
//! Use `TracingObserver` for servers (default) and `NoopObserver` where logs
//! are unwanted.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{QueryError, Stage};

/// Hooks called as a request moves through the pipeline.
pub trait StageObserver: Send + Sync {
    /// The request entered `stage`.
    fn entered(&self, _request_id: &str, _stage: Stage) {}
    /// The request failed; `err.stage()` is where.
    fn failed(&self, _request_id: &str, _err: &QueryError) {}
    /// The request produced a response.
    fn finished(&self, _request_id: &str, _elapsed: Duration) {}
}

#[derive(Default, Clone, Copy)]
pub struct NoopObserver;
impl StageObserver for NoopObserver {}

/// Writes each transition to `tracing`.
#[derive(Default, Clone, Copy)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn entered(&self, request_id: &str, stage: Stage) {
        debug!(request_id, %stage, "stage");
    }

    fn failed(&self, request_id: &str, err: &QueryError) {
        warn!(request_id, stage = %err.stage(), kind = err.kind(), error = %err, "query failed");
    }

    fn finished(&self, request_id: &str, elapsed: Duration) {
        info!(request_id, latency_ms = elapsed.as_millis() as u64, "query answered");
    }
}

/// Current stage of one request; read when its deadline fires.
#[derive(Debug)]
pub struct StageCell(Mutex<Stage>);

impl StageCell {
    pub fn new(stage: Stage) -> Self {
        Self(Mutex::new(stage))
    }

    pub fn set(&self, stage: Stage) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = stage;
    }

    pub fn get(&self) -> Stage {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }
}
