//! Prompt templates for the deep workflow and fast-path keyword help.
//! Only the input/output contracts are binding; wording is tuned freely.

use marketlens_common::{AnalysisPlan, ContextItem, Insight, Relationship};

pub fn analyze_query(query: &str) -> String {
    format!(
        r#"당신은 금융 시장 분석 전문가입니다. 다음 질의를 종합적으로 분석하세요.

질의: "{query}"

다음 JSON 형식으로 정확히 응답하세요 (다른 설명 없이 JSON만):
{{
  "keywords": ["키워드1", "키워드2"],
  "entities": {{"companies": [], "products": [], "sectors": []}},
  "complexity": "shallow|standard|deep|comprehensive",
  "analysis_requirements": ["시계열", "비교", "재무"],
  "focus_areas": ["핵심 분석 영역"],
  "expected_output_type": "brief|standard|full_report"
}}

분석 지침:
- keywords: 투자자 관점의 핵심 키워드 3-5개
- complexity: 단순 조회는 shallow, 비교/전략 분석은 comprehensive
- focus_areas: 질의가 실제로 묻는 분석 영역"#
    )
}

pub fn plan_analysis(query: &str, entities: &str, focus_areas: &[String]) -> String {
    format!(
        r#"당신은 금융 분석 전문가입니다. 다음 질의에 대한 분석 전략을 수립하세요.

질의: "{query}"
감지된 엔티티: {entities}
초점 영역: {focus_areas:?}

다음 JSON 형식으로 분석 계획을 작성하세요 (JSON만 출력):
{{
  "primary_focus": ["주요 분석 목표"],
  "comparison_axes": ["비교 기준"],
  "required_data_types": ["news", "company", "financial", "stock"],
  "key_questions": ["답해야 할 핵심 질문"],
  "approach": "balanced|quantitative|qualitative|temporal"
}}"#
    )
}

pub fn generate_insights(query: &str, plan: &AnalysisPlan, context_summary: &str) -> String {
    format!(
        r#"금융 애널리스트로서 다음 데이터를 분석하여 핵심 인사이트를 도출하세요.

**질의**: {query}
**분석 목표**: {:?}
**핵심 질문**: {:?}

**데이터**:
{context_summary}

다음 JSON 배열 형식으로 인사이트를 생성하세요 (3-5개, JSON만 출력):
[
  {{
    "title": "인사이트 제목",
    "type": "quantitative|qualitative|temporal|comparative",
    "finding": "발견사항 설명 (구체적 수치 포함)",
    "evidence": ["근거1", "근거2"],
    "significance": "투자자 관점에서의 의미",
    "confidence": 0.8
  }}
]"#,
        plan.primary_focus, plan.key_questions
    )
}

pub fn analyze_relationships(query: &str, entities: &str, insights: &[Insight]) -> String {
    let insight_titles: Vec<&str> = insights.iter().take(3).map(|i| i.title.as_str()).collect();
    format!(
        r#"금융 애널리스트로서 다음 엔티티들 간의 관계를 분석하세요.

**질의**: {query}
**엔티티**: {entities}
**도출된 인사이트**: {insight_titles:?}

경쟁 구도, 공급망 의존성, 이벤트가 시장에 미치는 영향, 뉴스와 기업의
연관을 다루세요. JSON 배열로만 출력하세요:
[
  {{
    "type": "news_entity|financial_news|event_market|supply_chain|competitive",
    "entities": ["엔티티1", "엔티티2"],
    "description": "관계 설명",
    "impact": "high|medium|low",
    "implication": "투자 관점 시사점"
  }}
]"#
    )
}

pub fn deep_reasoning(query: &str, insights: &[Insight], relationships: &[Relationship]) -> String {
    let insight_titles: Vec<&str> = insights.iter().map(|i| i.title.as_str()).collect();
    let relationship_kinds: Vec<String> =
        relationships.iter().map(|r| format!("{:?}", r.kind)).collect();
    format!(
        r#"금융 전문가로서 다음 분석 결과를 바탕으로 심층 추론을 수행하세요.

**질의**: {query}
**인사이트**: {insight_titles:?}
**관계**: {relationship_kinds:?}

Why(원인), How(메커니즘), What-if(시나리오), So-what(투자 의미)에
답하고 JSON으로만 출력하세요:
{{
  "why": {{"causes": ["원인"], "analysis": "원인 분석"}},
  "how": {{"mechanisms": ["메커니즘"], "analysis": "메커니즘 설명"}},
  "what_if": {{"scenarios": [{{"scenario": "시나리오", "probability": "high|medium|low", "impact": "설명"}}]}},
  "so_what": {{"investor_implications": "투자 의미", "actionable": ["실행 가능한 제안"]}}
}}"#
    )
}

pub fn synthesize_report(
    query: &str,
    insights_summary: &str,
    relationships_summary: &str,
    reasoning_summary: &str,
    expected_output_type: &str,
) -> String {
    let length_guide = match expected_output_type {
        "brief" => "800자 내외로 간결하게",
        "full_report" => "3000자 이상으로 상세하게",
        _ => "1500자 내외로",
    };
    format!(
        r#"금융 애널리스트로서 다음 분석 결과를 종합하여 완결된 투자 보고서를 작성하세요.

**질의**: {query}

### 인사이트
{insights_summary}

### 관계 분석
{relationships_summary}

### 심화 추론
{reasoning_summary}

다음 섹션을 반드시 포함한 Markdown 보고서를 {length_guide} 작성하세요:

# Executive Summary
# Market Context
# Key Findings
# Relationship & Competitive Analysis
# Deep Reasoning
# Investment Perspective

작성 원칙: 모든 주장에 데이터 근거 명시, 구체적 수치 포함, 실행 가능한
권고. 보고서 본문만 출력하세요."#
    )
}

pub fn enhance_report(query: &str, draft: &str, gaps: &[String]) -> String {
    format!(
        r#"다음 보고서의 품질을 개선하세요.

**질의**: {query}
**지적된 문제**: {gaps:?}

현재 보고서:
{draft}

문제를 보완하되 기존 섹션 구조를 유지하고, 구체적 수치와 근거를
보강하세요. 개선된 보고서 본문만 출력하세요."#
    )
}

/// Fast-path keyword help: used only when rule-based extraction is empty,
/// under a hard 1-second budget.
pub fn extract_keywords(query: &str) -> String {
    format!(
        r#"다음 질의에서 검색에 쓸 핵심 키워드 3개를 JSON 배열로만 출력하세요.

질의: "{query}"

["키워드1", "키워드2", "키워드3"]"#
    )
}

/// Compact per-type context summary fed to the insight prompt.
pub fn summarize_contexts(contexts: &[ContextItem]) -> String {
    if contexts.is_empty() {
        return "수집된 데이터가 없습니다.".to_string();
    }

    let mut by_type: std::collections::BTreeMap<String, Vec<&ContextItem>> =
        std::collections::BTreeMap::new();
    for ctx in contexts {
        by_type
            .entry(format!("{:?}", ctx.item_type).to_lowercase())
            .or_default()
            .push(ctx);
    }

    let mut parts = vec![format!("**총 데이터**: {}개", contexts.len())];
    for (type_name, items) in by_type {
        parts.push(format!("\n### {} ({}개)", type_name.to_uppercase(), items.len()));
        let mut sorted = items;
        sorted.sort_by(|a, b| {
            (b.confidence * b.relevance)
                .partial_cmp(&(a.confidence * a.relevance))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, ctx) in sorted.iter().take(3).enumerate() {
            let title: String = ctx.title().chars().take(100).collect();
            let summary: String = ctx.summary().chars().take(200).collect();
            parts.push(format!("[{}] {title} - {summary}", i + 1));
        }
    }
    parts.join("\n")
}
