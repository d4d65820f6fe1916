//! Per-request timings, process-wide counters, and the optional trace sink.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::debug;

use marketlens_common::Intent;

// --- Stage timings ---

/// Ordered per-request timing tree, keyed by component or node name.
#[derive(Debug, Default, Clone)]
pub struct StageTimings {
    stages: Vec<(String, Duration)>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: &str, elapsed: Duration) {
        self.stages.push((stage.to_string(), elapsed));
    }

    /// Time a closure-produced future and record it under `stage`.
    pub async fn time<T, F: std::future::Future<Output = T>>(
        &mut self,
        stage: &str,
        fut: F,
    ) -> T {
        let started = Instant::now();
        let out = fut.await;
        self.record(stage, started.elapsed());
        out
    }

    pub fn stages(&self) -> &[(String, Duration)] {
        &self.stages
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|(_, d)| *d).sum()
    }

    pub fn as_json(&self) -> Value {
        Value::Array(
            self.stages
                .iter()
                .map(|(name, d)| json!({"stage": name, "ms": d.as_millis() as u64}))
                .collect(),
        )
    }
}

// --- Metrics ---

/// Fixed histogram buckets in seconds.
const BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0];

#[derive(Debug, Default)]
pub struct Histogram {
    counts: [AtomicU64; 12],
    sum_ms: AtomicU64,
    total: AtomicU64,
}

impl Histogram {
    pub fn observe(&self, value: Duration) {
        let secs = value.as_secs_f64();
        let idx = BUCKETS
            .iter()
            .position(|b| secs <= *b)
            .unwrap_or(BUCKETS.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms
            .fetch_add(value.as_millis() as u64, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn as_json(&self) -> Value {
        let buckets: Vec<Value> = BUCKETS
            .iter()
            .enumerate()
            .map(|(i, le)| json!({"le": le, "count": self.counts[i].load(Ordering::Relaxed)}))
            .collect();
        json!({
            "buckets": buckets,
            "overflow": self.counts[BUCKETS.len()].load(Ordering::Relaxed),
            "count": self.total.load(Ordering::Relaxed),
            "sum_ms": self.sum_ms.load(Ordering::Relaxed),
        })
    }
}

/// Process-wide counters and gauges, exposed as JSON by the server.
#[derive(Debug, Default)]
pub struct Metrics {
    // queries_total{intent, status}
    pub queries_fast: AtomicU64,
    pub queries_deep: AtomicU64,
    pub queries_fallback: AtomicU64,
    pub queries_error: AtomicU64,
    by_intent: [AtomicU64; 6],

    pub response_seconds: Histogram,
    pub stage_seconds: Histogram,

    pub active_requests: AtomicI64,
    pub cache_lookups: AtomicU64,
    pub cache_hits: AtomicU64,
    pub analysis_cache_hits: AtomicU64,
}

impl Metrics {
    pub fn record_intent(&self, intent: Intent) {
        let idx = match intent {
            Intent::NewsInquiry => 0,
            Intent::StockAnalysis => 1,
            Intent::Comparison => 2,
            Intent::Trend => 3,
            Intent::GeneralQa => 4,
            Intent::Unknown => 5,
        };
        self.by_intent[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn as_json(&self) -> Value {
        json!({
            "queries_total": {
                "fast": self.queries_fast.load(Ordering::Relaxed),
                "deep": self.queries_deep.load(Ordering::Relaxed),
                "deep_fallback": self.queries_fallback.load(Ordering::Relaxed),
                "error": self.queries_error.load(Ordering::Relaxed),
            },
            "queries_by_intent": {
                "news_inquiry": self.by_intent[0].load(Ordering::Relaxed),
                "stock_analysis": self.by_intent[1].load(Ordering::Relaxed),
                "comparison": self.by_intent[2].load(Ordering::Relaxed),
                "trend": self.by_intent[3].load(Ordering::Relaxed),
                "general_qa": self.by_intent[4].load(Ordering::Relaxed),
                "unknown": self.by_intent[5].load(Ordering::Relaxed),
            },
            "response_seconds": self.response_seconds.as_json(),
            "stage_seconds": self.stage_seconds.as_json(),
            "active_requests": self.active_requests.load(Ordering::Relaxed),
            "cache": {
                "lookups": self.cache_lookups.load(Ordering::Relaxed),
                "hits": self.cache_hits.load(Ordering::Relaxed),
                "analysis_hits": self.analysis_cache_hits.load(Ordering::Relaxed),
            },
        })
    }
}

// --- Tracer ---

/// Single-method trace sink. LM calls and workflow nodes are recorded with
/// explicit begin/end payloads; when no sink is configured the no-op
/// implementation is selected at init and recording never raises.
pub trait Tracer: Send + Sync {
    fn record(&self, stage: &str, payload: Value);
}

pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn record(&self, _stage: &str, _payload: Value) {}
}

/// Fire-and-forget HTTP tracer. Failures are logged at debug and dropped;
/// tracing must never affect the request path.
pub struct HttpTracer {
    endpoint: String,
    secret: String,
    http: reqwest::Client,
}

impl HttpTracer {
    pub fn new(endpoint: &str, secret: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            secret: secret.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

impl Tracer for HttpTracer {
    fn record(&self, stage: &str, payload: Value) {
        let body = json!({"stage": stage, "payload": payload});
        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.secret)
            .timeout(Duration::from_secs(2))
            .json(&body);
        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                debug!(error = %e, "trace sink unreachable");
            }
        });
    }
}

/// Select the tracer from config: HTTP sink when both URL and secret are
/// present, no-op otherwise.
pub fn tracer_from_config(url: Option<&str>, secret: Option<&str>) -> Arc<dyn Tracer> {
    match (url, secret) {
        (Some(url), Some(secret)) if !url.is_empty() => Arc::new(HttpTracer::new(url, secret)),
        _ => Arc::new(NoopTracer),
    }
}
