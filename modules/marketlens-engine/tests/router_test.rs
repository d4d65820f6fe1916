//! Routing behavior against stubbed backends: dispatch, fallback, breaker
//! protection, and the envelope invariants.

mod harness;

use std::sync::Arc;

use marketlens_common::{AnalysisDepth, ChatRequest, EngineError, Intent};
use marketlens_engine::breaker::{BreakerState, BACKEND_GRAPH};

use harness::{build_router, test_breakers, Parts, StubChat, StubGraph};

fn chat(query: &str) -> ChatRequest {
    ChatRequest {
        query: query.to_string(),
        user_id: None,
        session_id: None,
        force_deep: false,
    }
}

#[tokio::test]
async fn empty_query_is_a_validation_error() {
    let router = build_router(Parts::healthy(), test_breakers());
    let err = router.route(&chat("   ")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn simple_news_lookup_takes_the_fast_path() {
    let router = build_router(Parts::healthy(), test_breakers());
    let response = router.route(&chat("삼성전자 뉴스")).await.unwrap();

    assert_eq!(response.response_type, "news_inquiry");
    assert_eq!(response.meta.processing_method, "fast");
    assert_eq!(response.meta.intent, Intent::NewsInquiry);
    assert!(!response.sources.is_empty());
    assert!(response.meta.processing_time_ms < 2_000);
    assert!(!response.meta.partial);
    assert!(response.markdown.contains("관련 뉴스"));
}

#[tokio::test]
async fn single_char_query_routes_fast() {
    let router = build_router(Parts::healthy(), test_breakers());
    let response = router.route(&chat("금")).await.unwrap();
    assert_eq!(response.meta.processing_method, "fast");
    assert!(response.meta.complexity_score < 0.7);
}

#[tokio::test]
async fn stock_outlook_dispatches_to_stock_handler() {
    let router = build_router(Parts::healthy(), test_breakers());
    let response = router.route(&chat("에코프로 전망 어때?")).await.unwrap();
    assert_eq!(response.response_type, "stock_analysis");
    assert!(response.markdown.contains("시세"));
}

#[tokio::test]
async fn glossary_question_is_answered_without_backends() {
    let router = build_router(Parts::healthy(), test_breakers());
    let response = router.route(&chat("PER이 뭐야?")).await.unwrap();
    assert_eq!(response.response_type, "general_qa");
    assert!(response.markdown.contains("PER"));
    assert!(response.sources.is_empty());
}

#[tokio::test]
async fn comparative_analysis_takes_the_deep_path() {
    let router = build_router(Parts::healthy(), test_breakers());
    let response = router
        .route(&chat("삼성전자와 SK하이닉스 HBM 경쟁력 비교 분석"))
        .await
        .unwrap();

    assert_eq!(response.meta.processing_method, "deep");
    assert!(response.meta.complexity_score >= 0.85);
    assert!(response.meta.quality_score.is_some());
    assert!(response.markdown.contains("Executive Summary"));
    assert!(response.markdown.contains("Deep Reasoning"));
    assert!(!response.meta.fallback_used);
}

#[tokio::test]
async fn forced_deep_on_shallow_query_with_dead_llm_falls_back() {
    // S3: deep requested, LM unavailable — answer must still arrive.
    let mut parts = Parts::healthy();
    parts.report = Arc::new(StubChat::failing());
    let router = build_router(parts, test_breakers());

    let request = ChatRequest {
        query: "2차전지".to_string(),
        user_id: None,
        session_id: None,
        force_deep: true,
    };
    let response = router.route(&request).await.unwrap();

    assert!(response.meta.fallback_used);
    assert!(response.meta.partial);
    assert_eq!(response.meta.processing_method, "deep_fallback");
    assert!(response.meta.complexity_score >= 0.95);
    assert!(matches!(
        response.meta.analysis_depth,
        AnalysisDepth::Deep | AnalysisDepth::Comprehensive
    ));
    // Still a complete envelope, not an error.
    assert!(!response.markdown.is_empty());
}

#[tokio::test]
async fn open_graph_breaker_degrades_to_search_only() {
    // S4: graph keeps timing out; after the threshold the breaker opens and
    // requests keep succeeding on search alone.
    let mut parts = Parts::healthy();
    parts.graph = Arc::new(StubGraph {
        rows: vec![],
        fail: true,
    });
    let breakers = test_breakers();
    let router = build_router(parts, breakers.clone());

    // Each request retries twice, so three requests exceed the threshold.
    for _ in 0..3 {
        let _ = router.route(&chat("삼성전자 뉴스")).await.unwrap();
    }
    assert_eq!(
        breakers.get(BACKEND_GRAPH).state().await,
        BreakerState::Open
    );

    let response = router.route(&chat("삼성전자 뉴스")).await.unwrap();
    assert!(response.meta.partial);
    assert!(response.graph_samples.is_empty());
    assert!(!response.sources.is_empty());
    assert_eq!(
        response.meta.degradation,
        marketlens_common::DegradationLevel::Degraded
    );
}

#[tokio::test]
async fn every_response_has_a_complete_envelope() {
    let router = build_router(Parts::healthy(), test_breakers());
    for query in ["삼성전자 뉴스", "PER이 뭐야?", "요즘 핫한 종목은?"] {
        let response = router.route(&chat(query)).await.unwrap();
        assert!(!response.markdown.is_empty());
        assert!(response.meta.complexity_score >= 0.0);
        assert!(response.meta.complexity_score <= 1.0);
        assert_eq!(response.meta.graph_samples_shown, response.graph_samples.len());
    }
}
