//! Per-source concurrency bound and retry controller.
//!
//! RULES:
//!   - One gate per upstream source; the bounds are independent.
//!   - A permit is taken before every attempt (retries included) and is
//!     released when that attempt ends, on every exit path.
//!   - No permit is held while sleeping between attempts.
//!   - Only `FetchError::Transient` is retried. The last failure is
//!     surfaced unchanged once attempts run out.

use crate::{
    cancel::CancelToken,
    config::{RetryPolicy, SourceLimits},
    error::{FetchError, ReconError, ReconResult},
    rng::JitterRng,
};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

pub struct SourceGate {
    name: &'static str,
    permits: Semaphore,
    max_concurrency: usize,
    policy: RetryPolicy,
    rng: Mutex<JitterRng>,
}

impl SourceGate {
    pub fn new(name: &'static str, limits: &SourceLimits, rng: JitterRng) -> Self {
        Self {
            name,
            permits: Semaphore::new(limits.max_concurrency),
            max_concurrency: limits.max_concurrency,
            policy: limits.retry.clone(),
            rng: Mutex::new(rng.with_name(name)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Permits not currently held by an attempt.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait before retry number `attempt` (1-based):
    /// `base * 2^(attempt-1) + uniform[0, jitter]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = match self.rng.lock() {
            Ok(mut rng) => rng.jitter_ms(self.policy.jitter_ms),
            Err(poisoned) => poisoned.into_inner().jitter_ms(self.policy.jitter_ms),
        };
        self.policy
            .exponential_delay(attempt)
            .saturating_add(Duration::from_millis(jitter))
    }

    /// Run `op` under this gate's bound and retry schedule.
    pub async fn call<T, F, Fut>(&self, cancel: &CancelToken, mut op: F) -> ReconResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ReconError::Cancelled),
                    permit = self.permits.acquire() => {
                        permit.map_err(|_| ReconError::Cancelled)?
                    }
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ReconError::Cancelled),
                    result = op() => result,
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(FetchError::Transient(message)) if attempt < attempts => {
                    let delay = self.backoff_delay(attempt);
                    log::warn!(
                        "{}: transient failure on attempt {attempt}/{attempts}, retrying in {delay:?}: {message}",
                        self.name
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ReconError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    log::debug!("{}: giving up after attempt {attempt}: {err}", self.name);
                    return Err(err.into());
                }
            }
        }
    }
}
