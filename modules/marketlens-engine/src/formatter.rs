//! Deterministic Markdown rendering. No LM calls here: the formatter must
//! produce a valid document even when every optional input is empty, with
//! explicit "data unavailable" notes instead of silently missing sections.

use marketlens_common::{Citation, ContextItem, GraphRow, StockSnapshot};

use crate::workflow::WorkflowState;

/// Citations rendered per response.
pub const MAX_CITATIONS: usize = 5;

/// Graph rows surfaced per response.
pub const MAX_GRAPH_SAMPLES: usize = 5;

pub const UNAVAILABLE_NOTE: &str = "_데이터를 가져오지 못했습니다._";

pub fn citations_from_items(items: &[ContextItem]) -> Vec<Citation> {
    items
        .iter()
        .filter_map(|item| {
            let url = item.str_field("url")?;
            Some(Citation {
                title: item.title().to_string(),
                url: url.to_string(),
                published_at: item.timestamp,
            })
        })
        .take(MAX_CITATIONS)
        .collect()
}

pub fn trim_graph_samples(rows: &[GraphRow]) -> Vec<GraphRow> {
    rows.iter().take(MAX_GRAPH_SAMPLES).cloned().collect()
}

fn item_bullet(item: &ContextItem) -> String {
    let title = item.title();
    let date = item
        .timestamp
        .map(|ts| format!(" ({})", ts.format("%Y-%m-%d")))
        .unwrap_or_default();
    let summary: String = item.summary().chars().take(120).collect();
    if summary.is_empty() {
        format!("- **{title}**{date}")
    } else {
        format!("- **{title}**{date} — {summary}")
    }
}

fn sources_section(sources: &[Citation]) -> String {
    let mut out = String::from("## 출처\n\n");
    if sources.is_empty() {
        out.push_str(UNAVAILABLE_NOTE);
        out.push('\n');
        return out;
    }
    for (i, citation) in sources.iter().enumerate() {
        let date = citation
            .published_at
            .map(|ts| format!(" ({})", ts.format("%Y-%m-%d")))
            .unwrap_or_default();
        out.push_str(&format!(
            "{}. [{}]({}){}\n",
            i + 1,
            citation.title,
            citation.url,
            date
        ));
    }
    out
}

fn graph_section(rows: &[GraphRow]) -> String {
    let mut out = String::from("## 연관 그래프 데이터\n\n");
    if rows.is_empty() {
        out.push_str(UNAVAILABLE_NOTE);
        out.push('\n');
        return out;
    }
    for row in rows.iter().take(MAX_GRAPH_SAMPLES) {
        let name = row
            .properties
            .get("name")
            .or_else(|| row.properties.get("title"))
            .and_then(|v| v.as_str())
            .unwrap_or("(이름 없음)");
        let labels = row.labels.join(", ");
        out.push_str(&format!("- `{labels}` {name}\n"));
    }
    out
}

fn partial_notice(partial: bool) -> String {
    if partial {
        "\n> 일부 데이터 소스에 접근하지 못해 제한된 정보로 구성된 답변입니다.\n".to_string()
    } else {
        String::new()
    }
}

pub fn render_news(
    query_text: &str,
    items: &[ContextItem],
    sources: &[Citation],
    graph_rows: &[GraphRow],
    partial: bool,
) -> String {
    let mut out = format!("## '{query_text}' 관련 뉴스\n\n");

    if items.is_empty() {
        out.push_str("조건에 맞는 뉴스를 찾지 못했습니다. 다른 키워드로 시도해 보세요.\n");
    } else {
        for item in items.iter().take(8) {
            out.push_str(&item_bullet(item));
            out.push('\n');
        }
    }

    out.push('\n');
    out.push_str(&sources_section(sources));
    out.push('\n');
    out.push_str(&graph_section(graph_rows));
    out.push_str(&partial_notice(partial));
    out
}

pub fn render_stock(
    query_text: &str,
    snapshot: Option<&StockSnapshot>,
    items: &[ContextItem],
    sources: &[Citation],
    partial: bool,
) -> String {
    let mut out = format!("## '{query_text}' 종목 브리핑\n\n");

    out.push_str("### 시세\n\n");
    match snapshot {
        Some(s) => {
            out.push_str("| 종목 | 현재가 | 등락 | 등락률 | 거래량 |\n");
            out.push_str("|---|---|---|---|---|\n");
            out.push_str(&format!(
                "| {} | {} | {:+} | {:+.2}% | {} |\n",
                s.symbol, s.last, s.change, s.change_pct, s.volume
            ));
        }
        None => {
            out.push_str(UNAVAILABLE_NOTE);
            out.push('\n');
        }
    }

    out.push_str("\n### 관련 뉴스\n\n");
    if items.is_empty() {
        out.push_str(UNAVAILABLE_NOTE);
        out.push('\n');
    } else {
        for item in items.iter().take(5) {
            out.push_str(&item_bullet(item));
            out.push('\n');
        }
    }

    out.push('\n');
    out.push_str(&sources_section(sources));
    out.push_str(&partial_notice(partial));
    out
}

pub fn render_general(
    query_text: &str,
    items: &[ContextItem],
    sources: &[Citation],
    graph_rows: &[GraphRow],
    partial: bool,
) -> String {
    let mut out = format!("## '{query_text}'에 대한 답변\n\n");

    if items.is_empty() {
        out.push_str(
            "관련 정보를 찾지 못했습니다. 기업명이나 산업 키워드를 포함해 다시 질문해 보세요.\n\n\
             **예시:**\n- \"삼성전자 관련 뉴스 보여줘\"\n- \"2차전지 유망주 추천해줘\"\n- \"PER이 뭐야?\"\n",
        );
    } else {
        for item in items.iter().take(6) {
            out.push_str(&item_bullet(item));
            out.push('\n');
        }
    }

    out.push('\n');
    out.push_str(&sources_section(sources));
    out.push('\n');
    out.push_str(&graph_section(graph_rows));
    out.push_str(&partial_notice(partial));
    out
}

/// Static glossary answer for financial-term questions; no backends needed.
pub fn render_glossary(query_text: &str) -> Option<String> {
    let lowered = query_text.to_lowercase();
    let mut sections: Vec<&str> = Vec::new();

    if lowered.contains("per") {
        sections.push(
            "### PER (Price Earnings Ratio)\n- **정의**: 주가를 주당순이익(EPS)으로 나눈 값\n\
             - **해석**: 낮을수록 저평가로 보지만 업종별 기준이 다릅니다\n\
             - **활용**: 같은 업종 내 기업 비교, 과거 밴드와의 비교",
        );
    }
    if lowered.contains("pbr") {
        sections.push(
            "### PBR (Price Book-value Ratio)\n- **정의**: 주가를 주당순자산(BPS)으로 나눈 값\n\
             - **해석**: 1 미만이면 청산가치 대비 저평가\n\
             - **한계**: 장부가치와 실제 자산가치의 괴리",
        );
    }
    if lowered.contains("roe") {
        sections.push(
            "### ROE (Return On Equity)\n- **정의**: 당기순이익을 자기자본으로 나눈 값\n\
             - **해석**: 자기자본으로 이익을 내는 효율\n\
             - **기준**: 통상 10% 이상이면 양호",
        );
    }
    if lowered.contains("배당") {
        sections.push(
            "### 배당 지표\n- **배당수익률**: 연간 배당금 ÷ 현재 주가\n\
             - **배당성향**: 순이익 중 배당으로 지급하는 비율\n\
             - **배당 안정성**: 지급 이력과 지속 가능성",
        );
    }

    if sections.is_empty() {
        return None;
    }

    Some(format!("## 금융 용어 설명\n\n{}\n", sections.join("\n\n")))
}

/// Deep-path rendering: the workflow's Markdown plus sources and a data
/// coverage footer.
pub fn render_deep_report(state: &WorkflowState, sources: &[Citation]) -> String {
    let mut out = if state.draft_report.trim().is_empty() {
        format!(
            "# Executive Summary\n\n'{}'에 대한 보고서를 생성하지 못했습니다.\n\n{}\n",
            state.query.text, UNAVAILABLE_NOTE
        )
    } else {
        state.draft_report.clone()
    };

    out.push_str("\n\n---\n\n");
    out.push_str(&sources_section(sources));
    out.push_str(&format!(
        "\n## 데이터 커버리지\n\n- 근거 자료 {}건 (다양성 {:.2})\n- 인사이트 {}건, 관계 분석 {}건\n- 품질 점수 {:.2}\n",
        state.contexts.len(),
        state.diversity_score,
        state.insights.len(),
        state.relationships.len(),
        state.quality_score,
    ));
    if !state.diagnostics.is_empty() {
        out.push_str(&format!(
            "- 수집 중 제약 {}건 발생\n",
            state.diagnostics.len()
        ));
    }
    out.push_str(&partial_notice(state.partial));
    out
}
