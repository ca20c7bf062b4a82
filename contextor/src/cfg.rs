//! Runtime configuration loaded from environment variables.

use std::time::Duration;

use ai_llm_service::AiLlmError;
use ai_llm_service::error_handler::{ConfigError, env_opt_u64};

/// Longest accepted `REQUEST_DEADLINE_MS`.
pub const MAX_REQUEST_DEADLINE: Duration = Duration::from_secs(10 * 60);
/// Longest accepted `CACHE_TTL_SECS`.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
const MAX_PERIOD: Duration = Duration::from_secs(24 * 3600);

/// Knobs of the query pipeline. Captured once at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Character budget of the assembled context.
    pub max_ctx_chars: usize,
    pub query_max_chars: usize,
    pub max_top_k: usize,
    /// Overlap between consecutive chunks of one document, in chars.
    pub chunk_overlap: usize,
    /// Whole-pipeline budget for one request.
    pub request_deadline: Duration,

    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub cache_sweep_every: Duration,

    /// Poll period of the readiness aggregator; also how long a snapshot stays fresh.
    pub readiness_interval: Duration,
    pub readiness_probe_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_ctx_chars: 8000,
            query_max_chars: 2000,
            max_top_k: 20,
            chunk_overlap: 200,
            request_deadline: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1024,
            cache_sweep_every: Duration::from_secs(60),
            readiness_interval: Duration::from_secs(15),
            readiness_probe_timeout: Duration::from_secs(2),
        }
    }
}

impl CoreConfig {
    /// Build from environment variables with defaults for anything unset.
    ///
    /// # Errors
    /// `AiLlmError::Config` for unparsable numbers or zero durations.
    pub fn from_env() -> Result<Self, AiLlmError> {
        let mut cfg = Self::default();

        if let Some(v) = env_opt_u64("MAX_CTX_CHARS")? {
            cfg.max_ctx_chars = v as usize;
        }
        if let Some(v) = env_opt_u64("QUERY_MAX_CHARS")? {
            cfg.query_max_chars = v as usize;
        }
        if let Some(v) = env_opt_u64("RAG_CHUNK_OVERLAP")? {
            cfg.chunk_overlap = v as usize;
        }
        if let Some(ms) = env_opt_u64("REQUEST_DEADLINE_MS")? {
            cfg.request_deadline = Duration::from_millis(ms);
        }
        if let Some(s) = env_opt_u64("CACHE_TTL_SECS")? {
            cfg.cache_ttl = Duration::from_secs(s);
        }
        if let Some(n) = env_opt_u64("CACHE_CAPACITY")? {
            cfg.cache_capacity = n as usize;
        }
        if let Some(s) = env_opt_u64("CACHE_SWEEP_SECS")? {
            cfg.cache_sweep_every = Duration::from_secs(s);
        }
        if let Some(s) = env_opt_u64("READINESS_INTERVAL_SECS")? {
            cfg.readiness_interval = Duration::from_secs(s);
        }
        if let Some(ms) = env_opt_u64("READINESS_PROBE_TIMEOUT_MS")? {
            cfg.readiness_probe_timeout = Duration::from_millis(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// `AiLlmError::Config` naming the first zero-valued or oversized field.
    pub fn validate(&self) -> Result<(), AiLlmError> {
        let zero = [
            ("MAX_CTX_CHARS", self.max_ctx_chars == 0),
            ("QUERY_MAX_CHARS", self.query_max_chars == 0),
            ("REQUEST_DEADLINE_MS", self.request_deadline.is_zero()),
            ("CACHE_SWEEP_SECS", self.cache_sweep_every.is_zero()),
            ("READINESS_INTERVAL_SECS", self.readiness_interval.is_zero()),
            ("READINESS_PROBE_TIMEOUT_MS", self.readiness_probe_timeout.is_zero()),
        ];
        if let Some((var, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::OutOfRange {
                field: *var,
                detail: "must be > 0".into(),
            }
            .into());
        }

        let bounded = [
            ("REQUEST_DEADLINE_MS", self.request_deadline, MAX_REQUEST_DEADLINE),
            ("CACHE_TTL_SECS", self.cache_ttl, MAX_CACHE_TTL),
            ("CACHE_SWEEP_SECS", self.cache_sweep_every, MAX_PERIOD),
            ("READINESS_INTERVAL_SECS", self.readiness_interval, MAX_PERIOD),
            ("READINESS_PROBE_TIMEOUT_MS", self.readiness_probe_timeout, MAX_PERIOD),
        ];
        match bounded.iter().find(|(_, v, max)| v > max) {
            Some((var, _, max)) => Err(ConfigError::OutOfRange {
                field: *var,
                detail: format!("must be <= {}s", max.as_secs()),
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CoreConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.query_max_chars, 2000);
        assert_eq!(cfg.max_top_k, 20);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let cfg = CoreConfig {
            max_ctx_chars: 0,
            ..CoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let deadline = CoreConfig {
            request_deadline: Duration::from_millis(u64::MAX),
            ..CoreConfig::default()
        };
        assert!(deadline.validate().is_err());

        let ttl = CoreConfig {
            cache_ttl: Duration::from_secs(u64::MAX),
            ..CoreConfig::default()
        };
        assert!(ttl.validate().is_err());

        let at_limit = CoreConfig {
            request_deadline: MAX_REQUEST_DEADLINE,
            cache_ttl: MAX_CACHE_TTL,
            ..CoreConfig::default()
        };
        assert!(at_limit.validate().is_ok());
    }
}
