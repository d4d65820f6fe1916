//! Retry with backoff around breaker-guarded adapter calls.
//!
//! Only the adapter layer retries; workflow nodes never do. Retries do not
//! extend the caller's deadline — each attempt is separately bounded by the
//! breaker's call timeout.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use marketlens_common::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
    ExponentialJitter,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub strategy: Backoff,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            strategy: Backoff::ExponentialJitter,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `attempt` (1-based) failures.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64();
        let raw = match self.strategy {
            Backoff::Fixed => base,
            Backoff::Linear => base * attempt as f64,
            Backoff::Exponential => base * 2f64.powi(attempt.saturating_sub(1) as i32),
            Backoff::ExponentialJitter => {
                let exp = base * 2f64.powi(attempt.saturating_sub(1) as i32);
                let jitter = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
                exp * (1.0 + jitter)
            }
        };
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` up to `max_attempts` times, sleeping the backoff between
    /// retryable failures. Non-retryable errors return immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketlens_common::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick(strategy: Backoff) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            strategy,
            jitter: 0.1,
        }
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = quick(Backoff::Fixed);
        assert_eq!(policy.delay_for(1), policy.delay_for(3));
    }

    #[test]
    fn linear_delay_grows() {
        let policy = quick(Backoff::Linear);
        assert!(policy.delay_for(3) > policy.delay_for(1));
    }

    #[test]
    fn exponential_delay_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            strategy: Backoff::Exponential,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            strategy: Backoff::Exponential,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(9), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = quick(Backoff::Fixed)
            .run(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EngineError::timeout("search", 10))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_short_circuits() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: EngineResult<()> = quick(Backoff::Fixed)
            .run(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Query("bad cypher".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(EngineError::Query(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_then_returns_last_error() {
        let result: EngineResult<()> = quick(Backoff::Fixed)
            .run(|| async { Err(EngineError::timeout("graph", 5)) })
            .await;
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
    }
}
