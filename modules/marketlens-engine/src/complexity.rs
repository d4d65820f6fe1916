//! Query complexity scoring for routing decisions.

use marketlens_common::Query;

const COMPLEX_KEYWORDS: &[&str] = &["비교", "분석", "전망", "트렌드", "보고서", "종합"];

const COMPARISON_WORDS: &[&str] = &["비교", "대비", "vs"];
const ANALYSIS_WORDS: &[&str] = &["분석", "평가", "전략"];

/// Markers that route to the deep path regardless of score.
pub const DEEP_MARKERS: &[&str] = &["상세히", "자세히", "보고서", "심층", "종합적"];

/// Additive complexity score over surface features, clamped to [0,1].
/// `force_deep` raises the result to at least 0.95 so the depth
/// classification lands in deep/comprehensive territory.
pub fn score(query: &Query, force_deep: bool) -> f32 {
    let text = &query.text;
    let mut score = 0.0f32;

    // Length bonus
    let chars = text.chars().count();
    if chars > 80 {
        score += 0.3;
    } else if chars > 50 {
        score += 0.2;
    }

    // Complex-keyword bonus, 0.15 per distinct hit, capped at 0.4
    let keyword_hits = COMPLEX_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
    score += (keyword_hits as f32 * 0.15).min(0.4);

    // Low-confidence intent needs the heavier pipeline to compensate
    if query.confidence < 0.6 {
        score += 0.2;
    }

    // Multi-entity bonus
    let companies = query.entities.company_count();
    if companies >= 3 {
        score += 0.4;
    } else if companies == 2 {
        score += 0.3;
    }

    // Composite bonus: explicit comparative analysis must reliably clear
    // the deep threshold.
    let has_comparison = COMPARISON_WORDS.iter().any(|w| text.contains(*w));
    let has_analysis = ANALYSIS_WORDS.iter().any(|w| text.contains(*w));
    if has_comparison && has_analysis {
        score += 0.5;
    }

    let mut score = score.clamp(0.0, 1.0);
    if force_deep {
        score = score.max(0.95);
    }
    score
}

/// Whether the raw text carries an explicit deep-analysis marker.
pub fn has_deep_marker(text: &str) -> bool {
    DEEP_MARKERS.iter().any(|m| text.contains(*m))
}
