//! Node implementations for the deep workflow.

use std::time::Instant;

use regex::Regex;
use tracing::debug;

use marketlens_common::{
    AnalysisPlan, ContextItem, ContextType, DeepReasoning, Insight, Relationship,
};

use super::json::{extract_array, extract_object, extract_object_with_keys};
use super::{DeepWorkflow, QueryAnalysis, WorkflowState};
use crate::cache::{fingerprint, CacheLayer};
use crate::context::EngineerOptions;
use crate::convert::{
    graph_row_to_context, keyword_relevance, news_hit_to_context, snapshot_to_context,
};
use crate::fetcher::FetchPlan;
use crate::prompts;

/// TTL for invariant-stable artifacts (query analysis, plan).
const STABLE_TTL: std::time::Duration = std::time::Duration::from_secs(86_400);

/// TTL for the hour-bucketed collected-data bundle.
const COLLECT_TTL: std::time::Duration = std::time::Duration::from_secs(3_600);

impl DeepWorkflow {
    /// Node 1: structured query analysis, cached unbucketed for 24 h.
    pub(super) async fn analyze_query(&self, state: &mut WorkflowState, deadline: Instant) {
        let key = fingerprint("analysis", &state.query.text, "", false);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(analysis) = serde_json::from_value::<QueryAnalysis>(cached) {
                debug!("query analysis served from cache");
                state.query_analysis = Some(analysis);
                return;
            }
        }

        let prompt = prompts::analyze_query(&state.query.text);
        let analysis = match self.llm_call("analyze_query", &prompt, deadline).await {
            Ok(response) => match extract_object::<QueryAnalysis>(&response) {
                Some(analysis) => analysis,
                None => {
                    state.diagnose("analyze_query", "unparseable response, rule-based fallback");
                    rule_based_analysis(state)
                }
            },
            Err(e) => {
                state.diagnose("analyze_query", e);
                rule_based_analysis(state)
            }
        };

        if let Ok(value) = serde_json::to_value(&analysis) {
            self.cache
                .set(&key, value, Some(STABLE_TTL), Some(&[CacheLayer::L1, CacheLayer::L3]))
                .await;
        }
        state.query_analysis = Some(analysis);
    }

    /// Node 2: analysis plan, cached by (query, intent) for 24 h.
    pub(super) async fn plan_analysis(&self, state: &mut WorkflowState, deadline: Instant) {
        let key = fingerprint(
            "plan",
            &state.query.text,
            &state.query.intent.to_string(),
            false,
        );
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(plan) = serde_json::from_value::<AnalysisPlan>(cached) {
                debug!("analysis plan served from cache");
                state.analysis_plan = Some(plan);
                return;
            }
        }

        let analysis = state.query_analysis.clone().unwrap_or_default();
        let entities = serde_json::to_string(&analysis.entities).unwrap_or_default();
        let prompt = prompts::plan_analysis(&state.query.text, &entities, &analysis.focus_areas);

        let plan = match self.llm_call("plan_analysis", &prompt, deadline).await {
            Ok(response) => match extract_object::<AnalysisPlan>(&response) {
                Some(plan) => plan,
                None => {
                    state.diagnose("plan_analysis", "unparseable response, default plan");
                    fallback_plan(state)
                }
            },
            Err(e) => {
                state.diagnose("plan_analysis", e);
                fallback_plan(state)
            }
        };

        if let Ok(value) = serde_json::to_value(&plan) {
            self.cache
                .set(&key, value, Some(STABLE_TTL), Some(&[CacheLayer::L1, CacheLayer::L3]))
                .await;
        }
        state.analysis_plan = Some(plan);
    }

    /// Node 3: parallel retrieval across graph, search, and (when a symbol
    /// is known) market. The raw bundle is hour-bucketed in the cache.
    pub(super) async fn collect_parallel_data(&self, state: &mut WorkflowState) {
        let params = format!(
            "{}:{}",
            state.request.depth, state.request.lookback_days
        );
        let key = fingerprint("collect", &state.query.text, &params, true);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(bundle) = serde_json::from_value::<CollectedBundle>(cached) {
                debug!("collected data served from cache");
                state.graph_samples = bundle.graph_samples;
                state.contexts = bundle.contexts;
                return;
            }
        }

        let analysis = state.query_analysis.clone().unwrap_or_default();
        let term = analysis
            .keywords
            .first()
            .cloned()
            .unwrap_or_else(|| state.query.text.clone());
        let search_query = analysis
            .keywords
            .iter()
            .take(2)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let search_query = if search_query.is_empty() {
            state.query.text.clone()
        } else {
            search_query
        };

        let mut plan = FetchPlan::new(state.request.lookback_days)
            .with_graph(&term, 100)
            .with_search(&search_query, 50);

        if let Some(embedder) = &self.embedder {
            if let Ok(vector) = embedder.embed(&state.query.text).await {
                plan = plan.with_search_vector(vector);
            }
        }

        let symbol = state
            .request
            .symbol
            .clone()
            .or_else(|| state.query.entities.tickers.iter().next().cloned());
        if let Some(symbol) = symbol {
            plan = plan.with_market(&symbol);
        }

        let outcome = self.fetcher.fetch(&plan).await;
        if outcome.partial() {
            state.partial = true;
            state.diagnose("collect_parallel_data", "one or more backends failed");
        }

        state.graph_samples = outcome.graph_rows().to_vec();

        let mut contexts = Vec::new();
        for row in outcome.graph_rows() {
            contexts.push(graph_row_to_context(row));
        }
        for hit in outcome.news_hits() {
            contexts.push(news_hit_to_context(hit));
        }
        if let Some(snapshot) = outcome.snapshot() {
            contexts.push(snapshot_to_context(snapshot));
        }
        for item in &mut contexts {
            item.relevance = keyword_relevance(&state.query.text, &item.text());
        }
        state.contexts = contexts;

        let bundle = CollectedBundle {
            contexts: state.contexts.clone(),
            graph_samples: state.graph_samples.clone(),
        };
        if let Ok(value) = serde_json::to_value(&bundle) {
            self.cache
                .set(&key, value, Some(COLLECT_TTL), Some(&[CacheLayer::L1]))
                .await;
        }
    }

    /// Node 4: full six-phase context engineering.
    pub(super) async fn apply_context_engineering(&self, state: &mut WorkflowState) {
        let opts = EngineerOptions {
            lightweight: false,
            lookback_days: state.request.lookback_days,
            ..EngineerOptions::default()
        };
        let items = std::mem::take(&mut state.contexts);
        let (shaped, diversity) = self
            .engineer
            .run(items, &state.query.text, state.analysis_plan.as_ref(), &opts)
            .await;
        state.contexts = shaped;
        state.diversity_score = diversity;
    }

    /// Node 6: structured insights from the shaped evidence.
    pub(super) async fn generate_insights(&self, state: &mut WorkflowState, deadline: Instant) {
        let plan = state.analysis_plan.clone().unwrap_or_default();
        let summary = prompts::summarize_contexts(&state.contexts);
        let prompt = prompts::generate_insights(&state.query.text, &plan, &summary);

        match self.llm_call("generate_insights", &prompt, deadline).await {
            Ok(response) => match extract_array::<Insight>(&response) {
                Some(insights) if !insights.is_empty() => {
                    state.insights = insights
                        .into_iter()
                        .map(|mut i| {
                            i.confidence = i.confidence.clamp(0.0, 1.0);
                            i
                        })
                        .collect();
                }
                _ => {
                    state.diagnose("generate_insights", "no parseable insight array");
                    state.insights = fallback_insight(&response, state.contexts.len());
                }
            },
            Err(e) => {
                state.diagnose("generate_insights", e);
            }
        }
    }

    /// Node 7: entity relationship analysis.
    pub(super) async fn analyze_relationships(&self, state: &mut WorkflowState, deadline: Instant) {
        let analysis = state.query_analysis.clone().unwrap_or_default();
        let entities = serde_json::to_string(&analysis.entities).unwrap_or_default();
        let prompt =
            prompts::analyze_relationships(&state.query.text, &entities, &state.insights);

        match self.llm_call("analyze_relationships", &prompt, deadline).await {
            Ok(response) => match extract_array::<Relationship>(&response) {
                Some(relationships) => state.relationships = relationships,
                None => {
                    state.diagnose("analyze_relationships", "no parseable relationship array");
                }
            },
            Err(e) => {
                state.diagnose("analyze_relationships", e);
            }
        }
    }

    /// Node 8: why/how/what-if/so-what reasoning with resilient JSON
    /// recovery. A parse failure yields the empty structure plus a
    /// diagnostic; the workflow continues.
    pub(super) async fn deep_reasoning(&self, state: &mut WorkflowState, deadline: Instant) {
        let prompt =
            prompts::deep_reasoning(&state.query.text, &state.insights, &state.relationships);

        match self.llm_call("deep_reasoning", &prompt, deadline).await {
            Ok(response) => {
                let parsed = extract_object_with_keys::<DeepReasoning>(
                    &response,
                    &["why", "how", "what_if", "so_what"],
                );
                match parsed {
                    Some(reasoning) => state.deep_reasoning = Some(reasoning),
                    None => {
                        state.diagnose("deep_reasoning", "response had no reasoning object");
                        state.deep_reasoning = Some(DeepReasoning::default());
                    }
                }
            }
            Err(e) => {
                state.diagnose("deep_reasoning", e);
                state.deep_reasoning = Some(DeepReasoning::default());
            }
        }
    }

    /// Node 9: the report itself.
    pub(super) async fn synthesize_report(&self, state: &mut WorkflowState, deadline: Instant) {
        let insights_summary: String = state
            .insights
            .iter()
            .take(5)
            .map(|i| {
                let finding: String = i.finding.chars().take(150).collect();
                format!("- **{}**: {finding}", i.title)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let relationships_summary: String = state
            .relationships
            .iter()
            .take(3)
            .map(|r| {
                let desc: String = r.description.chars().take(100).collect();
                format!("- {:?}: {desc}", r.kind)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let reasoning_summary = state
            .deep_reasoning
            .as_ref()
            .map(|r| {
                format!(
                    "원인: {} / 투자 의미: {}",
                    r.why.causes.join(", "),
                    r.so_what.investor_implications
                )
            })
            .unwrap_or_default();

        let output_type = state
            .query_analysis
            .as_ref()
            .map(|a| a.expected_output_type.clone())
            .unwrap_or_else(|| "standard".to_string());

        let prompt = prompts::synthesize_report(
            &state.query.text,
            &insights_summary,
            &relationships_summary,
            &reasoning_summary,
            &output_type,
        );

        match self.llm_call("synthesize_report", &prompt, deadline).await {
            Ok(report) if !report.trim().is_empty() => state.draft_report = report,
            Ok(_) => {
                state.diagnose("synthesize_report", "empty report from model");
                state.draft_report = skeleton_report(state, &insights_summary);
            }
            Err(e) => {
                state.diagnose("synthesize_report", e);
                state.draft_report = skeleton_report(state, &insights_summary);
            }
        }
    }

    /// Conditional node: one enhancement pass reusing the draft plus the
    /// named gaps.
    pub(super) async fn enhance_report(&self, state: &mut WorkflowState, deadline: Instant) {
        let mut gaps = Vec::new();
        if state.draft_report.chars().count() < 300 {
            gaps.push("보고서 길이 부족".to_string());
        }
        if state.insights.is_empty() {
            gaps.push("인사이트 부족".to_string());
        }
        if gaps.is_empty() {
            gaps.push("전반적 품질 저하".to_string());
        }

        let prompt = prompts::enhance_report(&state.query.text, &state.draft_report, &gaps);
        match self.llm_call("enhance_report", &prompt, deadline).await {
            Ok(enhanced) if enhanced.chars().count() > state.draft_report.chars().count() => {
                state.draft_report = enhanced;
            }
            Ok(_) => {
                state.diagnose("enhance_report", "enhancement did not improve the draft");
            }
            Err(e) => {
                state.diagnose("enhance_report", e);
            }
        }
    }
}

/// Node 5: no LM — contradiction detection, confidence floor, depth cap.
pub(super) fn cross_validate_contexts(state: &mut WorkflowState) {
    damp_contradictions(&mut state.contexts);

    state
        .contexts
        .retain(|c| c.confidence >= 0.3 && c.relevance.max(c.semantic_score.unwrap_or(0.3)) >= 0.2);

    state.contexts.sort_by(|a, b| {
        let score_a = a.confidence * a.semantic_score.unwrap_or(0.5);
        let score_b = b.confidence * b.semantic_score.unwrap_or(0.5);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    state.contexts.truncate(state.request.depth.max_contexts());
}

/// Node 10: weighted quality score; routing back to enhancement happens in
/// the runner.
pub(super) fn quality_check(state: &mut WorkflowState) {
    state.quality_score = super::compute_quality(
        &state.contexts,
        state.diversity_score,
        &state.insights,
        &state.relationships,
        state.deep_reasoning.as_ref(),
    );
}

/// Same metric reported with magnitudes >20% apart across items: damp both
/// sides instead of guessing which is right.
fn damp_contradictions(contexts: &mut [ContextItem]) {
    let metric_pattern =
        Regex::new(r"(매출|영업이익|순이익|점유율)\s*(?:은|는|이)?\s*([\d,.]+)\s*(조|억|%)")
            .expect("metric pattern");

    let mut readings: Vec<(usize, String, f64)> = Vec::new();
    for (idx, ctx) in contexts.iter().enumerate() {
        for cap in metric_pattern.captures_iter(&ctx.text()) {
            let metric = format!("{}{}", &cap[1], &cap[3]);
            if let Ok(value) = cap[2].replace(',', "").parse::<f64>() {
                readings.push((idx, metric, value));
            }
        }
    }

    let mut damped: Vec<usize> = Vec::new();
    for i in 0..readings.len() {
        for j in (i + 1)..readings.len() {
            let (idx_a, metric_a, val_a) = &readings[i];
            let (idx_b, metric_b, val_b) = &readings[j];
            if idx_a != idx_b && metric_a == metric_b {
                let larger = val_a.max(*val_b);
                if larger > 0.0 && (val_a - val_b).abs() / larger > 0.2 {
                    damped.push(*idx_a);
                    damped.push(*idx_b);
                }
            }
        }
    }

    for idx in damped {
        contexts[idx].confidence = (contexts[idx].confidence * 0.8).clamp(0.0, 1.0);
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CollectedBundle {
    contexts: Vec<ContextItem>,
    graph_samples: Vec<marketlens_common::GraphRow>,
}

fn rule_based_analysis(state: &WorkflowState) -> QueryAnalysis {
    QueryAnalysis {
        keywords: state.query.keywords.clone(),
        entities: state.query.entities.clone(),
        complexity: state.request.depth,
        analysis_requirements: Vec::new(),
        focus_areas: vec![state.query.text.clone()],
        expected_output_type: "standard".to_string(),
    }
}

fn fallback_plan(state: &WorkflowState) -> AnalysisPlan {
    let focus = state
        .query_analysis
        .as_ref()
        .map(|a| a.focus_areas.clone())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| vec![state.query.text.clone()]);
    AnalysisPlan {
        primary_focus: focus,
        comparison_axes: vec!["시장 포지션".to_string(), "성장성".to_string()],
        required_data_types: vec![ContextType::News, ContextType::Financial],
        key_questions: vec![state.query.text.clone()],
        approach: Default::default(),
    }
}

fn fallback_insight(response: &str, context_count: usize) -> Vec<Insight> {
    let finding: String = response.chars().take(500).collect();
    if finding.trim().is_empty() {
        return Vec::new();
    }
    vec![Insight {
        title: "종합 분석".to_string(),
        finding,
        evidence: vec![format!("{context_count}개 데이터 소스")],
        significance: "종합 분석 결과".to_string(),
        confidence: 0.5,
        ..Insight::default()
    }]
}

fn skeleton_report(state: &WorkflowState, insights_summary: &str) -> String {
    format!(
        "# Executive Summary\n\n'{}' 분석에서 {}개의 근거 자료와 {}개의 인사이트를 확보했습니다.\n\n\
         # Key Findings\n\n{}\n\n\
         # Investment Perspective\n\n데이터가 제한적이어서 상세 전망은 제공되지 않습니다.\n",
        state.query.text,
        state.contexts.len(),
        state.insights.len(),
        if insights_summary.is_empty() {
            "수집된 인사이트가 없습니다."
        } else {
            insights_summary
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketlens_common::{AnalysisDepth, ContextSource, Intent, Query};
    use serde_json::json;

    fn state_with_contexts(contexts: Vec<ContextItem>) -> WorkflowState {
        let query = Query {
            text: "삼성전자 분석".into(),
            keywords: vec!["삼성전자".into()],
            entities: Default::default(),
            intent: Intent::StockAnalysis,
            confidence: 0.8,
        };
        let request = super::super::WorkflowRequest {
            depth: AnalysisDepth::Standard,
            lookback_days: 180,
            domain: None,
            symbol: None,
        };
        let mut state = WorkflowState::new(query, request);
        state.contexts = contexts;
        state
    }

    fn ctx(text: &str, confidence: f32) -> ContextItem {
        let mut content = serde_json::Map::new();
        content.insert("title".into(), json!(text));
        let mut item = ContextItem::new(ContextSource::Search, ContextType::News, content);
        item.confidence = confidence;
        item.relevance = 0.5;
        item.semantic_score = Some(0.5);
        item
    }

    #[test]
    fn cross_validation_drops_weak_items_and_caps_count() {
        let mut contexts: Vec<ContextItem> =
            (0..60).map(|i| ctx(&format!("기사 {i}"), 0.9)).collect();
        contexts.push(ctx("약한 기사", 0.05));
        let mut state = state_with_contexts(contexts);
        cross_validate_contexts(&mut state);
        assert!(state.contexts.len() <= AnalysisDepth::Standard.max_contexts());
        assert!(state.contexts.iter().all(|c| c.confidence > 0.05));
    }

    #[test]
    fn contradicting_metrics_are_damped() {
        let a = ctx("삼성전자 매출은 70조 기록", 0.9);
        let b = ctx("삼성전자 매출은 40조 기록", 0.9);
        let mut items = vec![a, b];
        damp_contradictions(&mut items);
        assert!(items[0].confidence < 0.9);
        assert!(items[1].confidence < 0.9);
    }

    #[test]
    fn consistent_metrics_are_not_damped() {
        let a = ctx("매출은 70조 기록", 0.9);
        let b = ctx("매출은 69조 기록", 0.9);
        let mut items = vec![a, b];
        damp_contradictions(&mut items);
        assert_eq!(items[0].confidence, 0.9);
        assert_eq!(items[1].confidence, 0.9);
    }

    #[test]
    fn skeleton_report_is_valid_markdown() {
        let state = state_with_contexts(vec![]);
        let report = skeleton_report(&state, "");
        assert!(report.contains("# Executive Summary"));
        assert!(report.contains("# Key Findings"));
    }
}
