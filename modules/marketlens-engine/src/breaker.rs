//! Per-backend circuit breakers.
//!
//! One breaker per named backend. CLOSED executes normally and opens after
//! `failure_threshold` consecutive failures; OPEN fails fast until the
//! recovery timeout elapses; HALF_OPEN closes again after exactly
//! `half_open_success_threshold` successful probes, or reopens on the
//! first failure.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use marketlens_common::{DegradationLevel, EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_success_threshold: 3,
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    next_probe_at: Option<Instant>,
    total_requests: u64,
    total_failures: u64,
    total_timeouts: u64,
    open_rejections: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                next_probe_at: None,
                total_requests: 0,
                total_failures: 0,
                total_timeouts: 0,
                open_rejections: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Execute an operation under the breaker and its call timeout.
    /// A timeout counts as a failure and surfaces as `EngineError::Timeout`.
    pub async fn call<T, F>(&self, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        self.admit().await?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.call_timeout, fut).await;

        match outcome {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(false).await;
                Err(e)
            }
            Err(_) => {
                self.on_failure(true).await;
                Err(EngineError::timeout(
                    &self.name,
                    started.elapsed().as_millis() as u64,
                ))
            }
        }
    }

    async fn admit(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => {
                inner.total_requests += 1;
                Ok(())
            }
            BreakerState::Open => {
                let due = inner
                    .next_probe_at
                    .map(|at| Instant::now() >= at)
                    .unwrap_or(true);
                if due {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.total_requests += 1;
                    info!(breaker = %self.name, "moving to half-open");
                    Ok(())
                } else {
                    inner.open_rejections += 1;
                    Err(EngineError::CircuitOpen {
                        backend: self.name.clone(),
                    })
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.next_probe_at = None;
                    info!(breaker = %self.name, "closed after recovery");
                }
            }
            BreakerState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_sub(1);
            }
            BreakerState::Open => {}
        }
    }

    async fn on_failure(&self, timed_out: bool) {
        let mut inner = self.inner.lock().await;
        inner.total_failures += 1;
        if timed_out {
            inner.total_timeouts += 1;
        }
        inner.consecutive_failures += 1;

        match inner.state {
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.next_probe_at = Some(Instant::now() + self.config.recovery_timeout);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.next_probe_at = Some(Instant::now() + self.config.recovery_timeout);
                warn!(breaker = %self.name, "reopened during half-open probe");
            }
            BreakerState::Open => {}
        }
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            total_timeouts: inner.total_timeouts,
            open_rejections: inner.open_rejections,
        }
    }

    /// Manual reset to CLOSED, used by operational tooling.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.next_probe_at = None;
        info!(breaker = %self.name, "manually reset");
    }
}

#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub open_rejections: u64,
}

/// Registry of the process-wide breakers, one per backend.
pub struct BreakerRegistry {
    breakers: Vec<Arc<CircuitBreaker>>,
}

pub const BACKEND_GRAPH: &str = "graph";
pub const BACKEND_SEARCH: &str = "search";
pub const BACKEND_MARKET: &str = "market";
pub const BACKEND_LLM: &str = "llm";
pub const BACKEND_EMBEDDER: &str = "embedder";

impl BreakerRegistry {
    pub fn new(mut config_for: impl FnMut(&str) -> BreakerConfig) -> Self {
        let breakers = [
            BACKEND_GRAPH,
            BACKEND_SEARCH,
            BACKEND_MARKET,
            BACKEND_LLM,
            BACKEND_EMBEDDER,
        ]
        .iter()
        .map(|name| Arc::new(CircuitBreaker::new(name, config_for(name))))
        .collect();
        Self { breakers }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .iter()
            .find(|b| b.name() == name)
            .cloned()
            .unwrap_or_else(|| panic!("unknown breaker '{name}'"))
    }

    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut out = Vec::with_capacity(self.breakers.len());
        for b in &self.breakers {
            out.push(b.snapshot().await);
        }
        out
    }

    /// Operating mode derived from how many retrieval backends are open.
    /// The LM and embedder degrade behavior elsewhere; the level tracks the
    /// graph/search/market trio that retrieval depends on.
    pub async fn degradation_level(&self) -> DegradationLevel {
        let mut open = 0usize;
        let mut total = 0usize;
        for b in &self.breakers {
            if matches!(
                b.name(),
                BACKEND_GRAPH | BACKEND_SEARCH | BACKEND_MARKET
            ) {
                total += 1;
                if b.state().await == BreakerState::Open {
                    open += 1;
                }
            }
        }
        match open {
            0 => DegradationLevel::Full,
            1 => DegradationLevel::Degraded,
            n if n < total => DegradationLevel::Minimal,
            _ => DegradationLevel::Emergency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(50),
            half_open_success_threshold: 2,
            call_timeout: Duration::from_millis(100),
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call::<(), _>(async { Err(EngineError::unavailable("x", "down")) })
            .await;
    }

    async fn succeed(breaker: &CircuitBreaker) -> EngineResult<u32> {
        breaker.call(async { Ok(42u32) }).await
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("graph", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, BreakerState::Open);

        let err = succeed(&breaker).await.unwrap_err();
        assert!(matches!(err, EngineError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn single_failure_does_not_open() {
        let breaker = CircuitBreaker::new("graph", fast_config());
        fail(&breaker).await;
        assert_eq!(breaker.state().await, BreakerState::Closed);
        let snap = breaker.snapshot().await;
        assert_eq!(snap.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn success_decrements_failure_count() {
        let breaker = CircuitBreaker::new("graph", fast_config());
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let snap = breaker.snapshot().await;
        assert_eq!(snap.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn half_open_requires_exact_success_threshold() {
        let breaker = CircuitBreaker::new("graph", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        // First probe succeeds: still half-open.
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);

        // Second probe closes it.
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("graph", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        succeed(&breaker).await.unwrap();
        fail(&breaker).await;
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn call_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("graph", fast_config());
        let err = breaker
            .call::<(), _>(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        let snap = breaker.snapshot().await;
        assert_eq!(snap.total_timeouts, 1);
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn no_calls_attempted_while_open() {
        let breaker = CircuitBreaker::new("graph", fast_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let _ = breaker
            .call::<(), _>(async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn degradation_levels_track_open_retrieval_backends() {
        let registry = BreakerRegistry::new(|_| fast_config());
        assert_eq!(
            registry.degradation_level().await,
            DegradationLevel::Full
        );

        let graph = registry.get(BACKEND_GRAPH);
        for _ in 0..3 {
            fail(&graph).await;
        }
        assert_eq!(
            registry.degradation_level().await,
            DegradationLevel::Degraded
        );

        let search = registry.get(BACKEND_SEARCH);
        for _ in 0..3 {
            fail(&search).await;
        }
        assert_eq!(
            registry.degradation_level().await,
            DegradationLevel::Minimal
        );

        let market = registry.get(BACKEND_MARKET);
        for _ in 0..3 {
            fail(&market).await;
        }
        assert_eq!(
            registry.degradation_level().await,
            DegradationLevel::Emergency
        );
    }
}
