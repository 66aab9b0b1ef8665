use crate::{
    error::{ReconError, ReconResult},
    money::CurrencyCode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry schedule for one upstream source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first one.
    pub attempts: u32,
    pub base_delay_ms: u64,
    /// Upper bound of the uniform jitter added to every backoff.
    pub jitter_ms: u64,
    /// Cap applied to the exponential part before jitter is added.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl RetryPolicy {
    /// Exponential part of the wait before retry number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, saturating, then capped.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let mut ms = self.base_delay_ms.saturating_mul(factor);
        if let Some(cap) = self.max_delay_ms {
            ms = ms.min(cap);
        }
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceLimits {
    /// Maximum calls in flight against this source at once.
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconConfig {
    /// Currency every reported amount must be in.
    pub currency: CurrencyCode,
    /// Tolerance used by the runner when none is given on the command line.
    pub default_tolerance_minor: i64,
    pub default_period_count: i64,
    /// Seed for backoff jitter. None draws from OS entropy.
    #[serde(default)]
    pub jitter_seed: Option<u64>,
    /// The internal system of record.
    pub internal: SourceLimits,
    /// The external portal. Usually slower and given a tighter bound.
    pub portal: SourceLimits,
}

impl ReconConfig {
    /// Load from a JSON file.
    /// In tests, use ReconConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: ReconConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Fast, deterministic configuration for tests: millisecond backoff,
    /// fixed jitter seed.
    pub fn default_test() -> Self {
        Self {
            currency: CurrencyCode::EUR,
            default_tolerance_minor: 50,
            default_period_count: 3,
            jitter_seed: Some(42),
            internal: SourceLimits {
                max_concurrency: 8,
                retry: RetryPolicy {
                    attempts: 3,
                    base_delay_ms: 1,
                    jitter_ms: 1,
                    max_delay_ms: Some(10),
                },
            },
            portal: SourceLimits {
                max_concurrency: 2,
                retry: RetryPolicy {
                    attempts: 4,
                    base_delay_ms: 1,
                    jitter_ms: 2,
                    max_delay_ms: Some(10),
                },
            },
        }
    }

    pub fn validate(&self) -> ReconResult<()> {
        if self.default_tolerance_minor < 0 {
            return Err(ReconError::InvalidConfig(
                "default_tolerance_minor must be >= 0".into(),
            ));
        }
        for (name, limits) in [("internal", &self.internal), ("portal", &self.portal)] {
            if limits.max_concurrency == 0 {
                return Err(ReconError::InvalidConfig(format!(
                    "{name}.max_concurrency must be >= 1"
                )));
            }
            if limits.retry.attempts == 0 {
                return Err(ReconError::InvalidConfig(format!(
                    "{name}.retry.attempts must be >= 1"
                )));
            }
        }
        Ok(())
    }
}
