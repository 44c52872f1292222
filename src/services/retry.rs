use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::services::fusion::FusionError;

/// Backoff parameters for calls against the fusion upstream.
///
/// Rate-limit signals back off exponentially (`base^attempt` seconds,
/// jittered); other transient failures wait a fixed short delay. Permanent
/// failures are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub rate_limit_base_secs: f64,
    pub transient_backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_base_secs: 3.0,
            transient_backoff_secs: 5.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay after the `attempt`-th (1-based) rate-limited failure.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.7..1.3);
        let secs = self.rate_limit_base_secs.powi(attempt as i32) * jitter;
        Duration::from_secs_f64(secs)
    }

    pub fn transient_delay(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..2.0);
        Duration::from_secs_f64(self.transient_backoff_secs + jitter)
    }
}

/// Run `op` under the retry policy. The operation receives the 1-based
/// attempt number. Backoff sleeps are plain `tokio::time::sleep`s, so
/// dropping the returned future (caller disconnect, deadline) cancels the
/// wait along with everything else.
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, FusionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FusionError>>,
{
    if policy.max_attempts == 0 {
        return Err(FusionError::Permanent(
            "retry policy allows zero attempts".to_string(),
        ));
    }

    for attempt in 1..=policy.max_attempts {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "fusion call succeeded after retries");
                }
                return Ok(value);
            }
            Err(e @ FusionError::Permanent(_)) => return Err(e),
            Err(e @ FusionError::RateLimitExhausted { .. }) => return Err(e),
            Err(FusionError::RateLimited(reason)) => {
                metrics::counter!("fusion_retries_total").increment(1);
                if attempt == policy.max_attempts {
                    return Err(FusionError::RateLimitExhausted {
                        attempts: policy.max_attempts,
                    });
                }
                let delay = policy.rate_limit_delay(attempt);
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    %reason,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e @ FusionError::Transient(_)) => {
                metrics::counter!("fusion_retries_total").increment(1);
                if attempt == policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.transient_delay();
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %e,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("loop returns on every branch of the final attempt")
}
