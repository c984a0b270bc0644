//! Engine configuration

use std::time::Duration;

use cw_domain::EligibilityConfig;
use serde::{Deserialize, Serialize};

/// Workflow engine knobs. Defaults mirror production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// OCR stage wall-clock timeout, seconds.
    pub ocr_timeout_s: u64,
    /// Extraction stage wall-clock timeout, seconds.
    pub extract_timeout_s: u64,
    /// Decision stage wall-clock timeout, seconds.
    pub decision_timeout_s: u64,
    /// Upload size ceiling; a file exactly at the limit is accepted.
    pub max_file_size_bytes: i64,
    /// Retryable-failure budget per stage.
    pub max_attempts_per_stage: u32,
    /// Base of the exponential retry backoff, milliseconds.
    pub retry_backoff_base_ms: u64,
    /// Advance lease time-to-live, seconds.
    pub lease_ttl_s: u64,
    /// Business rule thresholds.
    pub eligibility: EligibilityConfig,
    /// Concurrent stage executions per worker process.
    pub worker_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ocr_timeout_s: 60,
            extract_timeout_s: 90,
            decision_timeout_s: 60,
            max_file_size_bytes: 52_428_800,
            max_attempts_per_stage: 3,
            retry_backoff_base_ms: 500,
            lease_ttl_s: 30,
            eligibility: EligibilityConfig::default(),
            worker_concurrency: 2,
        }
    }
}

impl EngineConfig {
    /// Read overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        let eligibility_defaults = EligibilityConfig::default();
        Self {
            ocr_timeout_s: var("CW_OCR_TIMEOUT_S", defaults.ocr_timeout_s),
            extract_timeout_s: var("CW_EXTRACT_TIMEOUT_S", defaults.extract_timeout_s),
            decision_timeout_s: var("CW_DECISION_TIMEOUT_S", defaults.decision_timeout_s),
            max_file_size_bytes: var("CW_MAX_FILE_SIZE_BYTES", defaults.max_file_size_bytes),
            max_attempts_per_stage: var("CW_MAX_ATTEMPTS_PER_STAGE", defaults.max_attempts_per_stage),
            retry_backoff_base_ms: var("CW_RETRY_BACKOFF_BASE_MS", defaults.retry_backoff_base_ms),
            lease_ttl_s: var("CW_LEASE_TTL_S", defaults.lease_ttl_s),
            eligibility: EligibilityConfig {
                income_threshold: var("CW_INCOME_THRESHOLD", eligibility_defaults.income_threshold),
                balance_threshold: var(
                    "CW_BALANCE_THRESHOLD",
                    eligibility_defaults.balance_threshold,
                ),
                confidence_min: var("CW_CONFIDENCE_MIN", eligibility_defaults.confidence_min),
                auto_approve_min: var("CW_AUTO_APPROVE_MIN", eligibility_defaults.auto_approve_min),
                benefit_cap: var("CW_BENEFIT_CAP", eligibility_defaults.benefit_cap),
                benefit_base: var("CW_BENEFIT_BASE", eligibility_defaults.benefit_base),
            },
            worker_concurrency: var("CW_WORKER_CONCURRENCY", defaults.worker_concurrency),
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_s)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_s)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_s)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_s)
    }

    /// Exponential backoff before retry attempt `attempt + 1`.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_base_ms.saturating_mul(1 << exp))
    }
}
