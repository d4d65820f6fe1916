//! Test doubles for the retrieval backends and models, plus assembly
//! helpers that wire a full router/workflow without any network.

// Shared by several test binaries; not every binary uses every stub.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;

use ai_client::{ChatModel, EmbedModel, GenerateOptions};
use marketlens_common::{
    EngineError, EngineResult, GraphRow, NewsHit, StockSnapshot, SymbolMatch,
};
use marketlens_engine::backends::{GraphBackend, MarketBackend, SearchBackend};
use marketlens_engine::breaker::{BreakerConfig, BreakerRegistry};
use marketlens_engine::cache::MultiLevelCache;
use marketlens_engine::context::ContextEngineer;
use marketlens_engine::fetcher::ParallelFetcher;
use marketlens_engine::handlers::FastDeps;
use marketlens_engine::observability::{Metrics, NoopTracer};
use marketlens_engine::retry::{Backoff, RetryPolicy};
use marketlens_engine::workflow::DeepWorkflow;
use marketlens_engine::{QueryRouter, RouterConfig};

// --- Stub backends ---

pub struct StubGraph {
    pub rows: Vec<GraphRow>,
    pub fail: bool,
}

#[async_trait]
impl GraphBackend for StubGraph {
    async fn search(&self, _term: &str, _limit: i64, _lookback: u32) -> EngineResult<Vec<GraphRow>> {
        if self.fail {
            Err(EngineError::timeout("graph", 500))
        } else {
            Ok(self.rows.clone())
        }
    }

    async fn ready(&self) -> bool {
        !self.fail
    }
}

pub struct StubSearch {
    pub hits: Vec<NewsHit>,
    pub fail: bool,
}

#[async_trait]
impl SearchBackend for StubSearch {
    async fn hybrid(
        &self,
        _query: &str,
        _vector: Option<&[f32]>,
        _lookback: u32,
        size: usize,
    ) -> EngineResult<Vec<NewsHit>> {
        if self.fail {
            Err(EngineError::unavailable("search", "stub down"))
        } else {
            Ok(self.hits.iter().take(size).cloned().collect())
        }
    }

    async fn ready(&self) -> bool {
        !self.fail
    }
}

pub struct StubMarket {
    pub snapshot: Option<StockSnapshot>,
    pub fail: bool,
}

#[async_trait]
impl MarketBackend for StubMarket {
    async fn quote(&self, symbol: &str) -> EngineResult<StockSnapshot> {
        if self.fail {
            return Err(EngineError::unavailable("market", "stub down"));
        }
        self.snapshot
            .clone()
            .ok_or_else(|| EngineError::Query(format!("unknown symbol {symbol}")))
    }

    async fn search_symbols(&self, _q: &str, _limit: usize) -> EngineResult<Vec<SymbolMatch>> {
        if self.fail {
            return Err(EngineError::unavailable("market", "stub down"));
        }
        Ok(self
            .snapshot
            .iter()
            .map(|s| SymbolMatch {
                symbol: s.symbol.clone(),
                name: "테스트종목".into(),
            })
            .collect())
    }

    async fn ready(&self) -> bool {
        !self.fail
    }
}

/// Scripted chat model: pops one response per call, repeating the last one
/// when the script runs dry. `fail` makes every call time out.
pub struct StubChat {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl StubChat {
    pub fn scripted(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new("{}".to_string()),
            fail: false,
            delay: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(String::new()),
            fail: true,
            delay: None,
        }
    }
}

#[async_trait]
impl ChatModel for StubChat {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> EngineResult<String> {
        if self.fail {
            return Err(EngineError::timeout("llm", 1000));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut queue = self.responses.lock().await;
        match queue.pop_front() {
            Some(response) => {
                *self.last.lock().await = response.clone();
                Ok(response)
            }
            None => Ok(self.last.lock().await.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "stub-chat"
    }
}

/// Deterministic embedder: character-bucket counts, stable across runs so
/// workflow idempotence is testable. Texts sharing vocabulary score high,
/// unrelated texts stay well below the near-duplicate threshold.
pub struct StubEmbed;

#[async_trait]
impl EmbedModel for StubEmbed {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vector = vec![0.0f32; 64];
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            vector[(c as usize) % 64] += 1.0;
        }
        Ok(vector)
    }

    fn dim(&self) -> usize {
        64
    }
}

// --- Fixtures ---

pub fn news_hit(id: &str, title: &str) -> NewsHit {
    NewsHit {
        id: id.to_string(),
        title: title.to_string(),
        url: format!("https://news.example/{id}"),
        summary: Some(format!("{title} 상세 내용과 수치 10% 증가")),
        published_at: Some(Utc::now() - chrono::Duration::days(2)),
        score: 7.5,
        highlights: vec![],
        metadata: serde_json::Map::new(),
    }
}

pub fn graph_row(name: &str, label: &str) -> GraphRow {
    let mut properties = serde_json::Map::new();
    properties.insert("name".into(), json!(name));
    GraphRow {
        properties,
        labels: vec![label.to_string()],
        ts: Some(Utc::now() - chrono::Duration::days(5)),
    }
}

pub fn snapshot(symbol: &str) -> StockSnapshot {
    StockSnapshot {
        symbol: symbol.to_string(),
        last: 71_000.0,
        change: 1_200.0,
        change_pct: 1.72,
        volume: 12_000_000,
        as_of: Utc::now(),
    }
}

/// Scripted deep-workflow responses in node order.
pub fn deep_script() -> Vec<&'static str> {
    vec![
        // analyze_query
        r#"{"keywords": ["삼성전자", "SK하이닉스", "HBM"], "entities": {"companies": ["삼성전자", "SK하이닉스"]}, "complexity": "comprehensive", "focus_areas": ["HBM 경쟁력"], "expected_output_type": "full_report"}"#,
        // plan_analysis
        r#"{"primary_focus": ["HBM 경쟁력"], "comparison_axes": ["기술력", "점유율"], "required_data_types": ["news", "financial"], "key_questions": ["누가 앞서는가"], "approach": "balanced"}"#,
        // generate_insights
        r#"[{"title": "HBM3E 양산 격차", "type": "comparative", "finding": "SK하이닉스가 HBM3E 양산에서 2분기 앞섬", "evidence": ["뉴스 3건", "수주 공시"], "significance": "단기 점유율 우위", "confidence": 0.85}]"#,
        // analyze_relationships
        r#"[{"type": "competitive", "entities": ["삼성전자", "SK하이닉스"], "description": "HBM 시장 양강 구도", "impact": "high", "implication": "수주 모멘텀에 따라 주가 차별화"}]"#,
        // deep_reasoning
        r#"{"why": {"causes": ["AI 서버 수요"], "analysis": "수요 급증"}, "how": {"mechanisms": ["선단 공정 수율"], "analysis": ""}, "what_if": {"scenarios": [{"scenario": "수요 둔화", "probability": "low", "impact": "양사 모두 조정"}]}, "so_what": {"investor_implications": "HBM 수주 공시가 핵심 촉매", "actionable": ["공시 모니터링"]}}"#,
        // synthesize_report
        "# Executive Summary\n\nHBM 경쟁 분석 요약.\n\n# Market Context\n\nAI 서버 수요.\n\n# Key Findings\n\n- HBM3E 양산 격차\n\n# Relationship & Competitive Analysis\n\n양강 구도.\n\n# Deep Reasoning\n\n수요 급증이 원인.\n\n# Investment Perspective\n\n수주 공시 모니터링.",
    ]
}

// --- Assembly ---

pub struct Parts {
    pub graph: Arc<dyn GraphBackend>,
    pub search: Arc<dyn SearchBackend>,
    pub market: Arc<dyn MarketBackend>,
    pub chat: Arc<dyn ChatModel>,
    pub report: Arc<dyn ChatModel>,
}

impl Parts {
    pub fn healthy() -> Self {
        Self {
            graph: Arc::new(StubGraph {
                rows: vec![graph_row("삼성전자", "Company"), graph_row("HBM 수주", "News")],
                fail: false,
            }),
            search: Arc::new(StubSearch {
                hits: vec![
                    news_hit("1", "삼성전자 HBM3E 공급 개시"),
                    news_hit("2", "SK하이닉스 HBM 점유율 확대"),
                ],
                fail: false,
            }),
            market: Arc::new(StubMarket {
                snapshot: Some(snapshot("005930")),
                fail: false,
            }),
            chat: Arc::new(StubChat::scripted(vec![r#"["삼성전자", "HBM"]"#])),
            report: Arc::new(StubChat::scripted(deep_script())),
        }
    }
}

pub fn test_breakers() -> Arc<BreakerRegistry> {
    Arc::new(BreakerRegistry::new(|_| BreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(60),
        half_open_success_threshold: 3,
        call_timeout: Duration::from_secs(5),
    }))
}

pub fn build_router(parts: Parts, breakers: Arc<BreakerRegistry>) -> Arc<QueryRouter> {
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        strategy: Backoff::Fixed,
        jitter: 0.0,
    };

    let fetcher = Arc::new(ParallelFetcher::new(
        parts.graph,
        parts.search,
        parts.market.clone(),
        breakers.clone(),
        retry,
    ));
    let embedder: Arc<dyn EmbedModel> = Arc::new(StubEmbed);
    let engineer = Arc::new(ContextEngineer::new(Some(embedder.clone())));
    let cache = Arc::new(MultiLevelCache::memory_only(
        128,
        16,
        Duration::from_secs(600),
    ));

    let workflow = Arc::new(DeepWorkflow::new(
        parts.report,
        Some(embedder),
        fetcher.clone(),
        engineer.clone(),
        cache,
        breakers.clone(),
        Arc::new(NoopTracer),
    ));

    let fast = FastDeps {
        fetcher,
        engineer,
        chat_model: parts.chat,
        market: parts.market,
        breakers: breakers.clone(),
        lookback_days: 180,
    };

    Arc::new(QueryRouter::new(
        fast,
        workflow,
        breakers,
        Arc::new(Metrics::default()),
        RouterConfig::default(),
    ))
}
