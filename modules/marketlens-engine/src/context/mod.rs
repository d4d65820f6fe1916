//! Context engineering: the six-phase filter/rerank/sequence pipeline that
//! shapes retrieved evidence before it reaches the language model.
//!
//! Phases: relevance cascade → semantic filter → dedup → metadata rerank →
//! sequencing → final pruning. The fast path runs a lightweight variant
//! (cascade + rerank only).

pub mod quality;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use ai_client::{cosine, EmbedModel};
use marketlens_common::quality::*;
use marketlens_common::{AnalysisPlan, ContextItem, ContextType};

use crate::convert::keyword_relevance;
use quality::QualityScorer;

#[derive(Debug, Clone)]
pub struct EngineerOptions {
    /// Cascade + rerank only; used by the fast handlers.
    pub lightweight: bool,
    pub lookback_days: u32,
    pub prune_limit: usize,
}

impl Default for EngineerOptions {
    fn default() -> Self {
        Self {
            lightweight: false,
            lookback_days: 180,
            prune_limit: FINAL_PRUNE_LIMIT,
        }
    }
}

pub struct ContextEngineer {
    embedder: Option<Arc<dyn EmbedModel>>,
    scorer: QualityScorer,
}

impl ContextEngineer {
    pub fn new(embedder: Option<Arc<dyn EmbedModel>>) -> Self {
        Self {
            embedder,
            scorer: QualityScorer::new(),
        }
    }

    /// Run the pipeline. Returns the shaped items and their diversity score.
    pub async fn run(
        &self,
        mut items: Vec<ContextItem>,
        query: &str,
        plan: Option<&AnalysisPlan>,
        opts: &EngineerOptions,
    ) -> (Vec<ContextItem>, f32) {
        let initial = items.len();

        // Phase 1: relevance cascade
        items = self.relevance_cascade(items, opts.lookback_days);
        let after_cascade = items.len();

        if !opts.lightweight {
            // Phase 2: semantic filter with diversity mode
            items = self.semantic_filter(items, query).await;

            // Phase 3: dedup (exact, then near-dup sliding window)
            items = dedup(items);
        } else {
            // The fast path still needs semantic scores for the reranker;
            // fall back to keyword overlap without embedding calls.
            for item in &mut items {
                item.semantic_score = Some(keyword_relevance(query, &item.text()));
            }
        }

        // Phase 4: metadata-enhanced rerank
        rerank(&mut items, plan);

        if !opts.lightweight {
            // Phase 5: sequencing for the reader
            sequence(&mut items);
        }

        // Phase 6: final pruning
        items.truncate(opts.prune_limit);
        let diversity = diversity_score(&items);

        debug!(
            initial,
            after_cascade,
            retained = items.len(),
            diversity,
            lightweight = opts.lightweight,
            "context engineering complete"
        );

        (items, diversity)
    }

    /// Phase 1: source priority, recency decay, confidence floor.
    fn relevance_cascade(&self, mut items: Vec<ContextItem>, lookback_days: u32) -> Vec<ContextItem> {
        let now = Utc::now();
        for item in &mut items {
            let quality = match item.quality_score {
                Some(q) => q.clamp(0.0, 1.0),
                None => {
                    let q = self.scorer.content_quality(item);
                    item.quality_score = Some(q);
                    q
                }
            };

            let featured = if item.is_featured { FEATURED_BONUS } else { 0.0 };
            let synced = if item.synced { SYNCED_BONUS } else { 0.0 };
            let weight = item.source.weight() * (quality + featured + synced);
            item.source_weight = Some(weight);
            item.confidence = (item.confidence * weight).clamp(0.0, 1.0);

            let recency = match item.timestamp {
                Some(ts) => {
                    let age_days = (now - ts).num_days().max(0) as f64;
                    if age_days > lookback_days as f64 {
                        0.0
                    } else {
                        ((-age_days * std::f64::consts::LN_2 / RECENCY_HALF_LIFE_DAYS).exp()) as f32
                    }
                }
                None => 0.5,
            };
            item.recency_score = Some(recency);
        }

        items.retain(|item| item.confidence >= CONFIDENCE_FLOOR);
        items.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items
    }

    /// Phase 2: cosine similarity against the query, greedy diversity
    /// selection. Embedder failure degrades to keyword overlap.
    async fn semantic_filter(&self, mut items: Vec<ContextItem>, query: &str) -> Vec<ContextItem> {
        match &self.embedder {
            Some(embedder) => {
                let query_vec = match embedder.embed(query).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "query embedding failed, keyword fallback");
                        for item in &mut items {
                            item.semantic_score = Some(keyword_relevance(query, &item.text()));
                        }
                        items.truncate(SEMANTIC_TOP_M);
                        return items;
                    }
                };

                for item in &mut items {
                    let text: String = item.text().chars().take(300).collect();
                    match embedder.embed(&text).await {
                        Ok(vec) => {
                            item.semantic_score = Some(cosine(&query_vec, &vec));
                            item.embedding = Some(vec);
                        }
                        Err(_) => {
                            item.semantic_score = Some(keyword_relevance(query, &text));
                        }
                    }
                }
            }
            None => {
                for item in &mut items {
                    item.semantic_score = Some(keyword_relevance(query, &item.text()));
                }
            }
        }

        items.sort_by(|a, b| {
            b.semantic_score
                .partial_cmp(&a.semantic_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        diversity_select(items, SEMANTIC_TOP_M)
    }
}

/// Greedy top-M selection that skips candidates too similar to anything
/// already kept (min pairwise dissimilarity DIVERSITY_TAU).
fn diversity_select(items: Vec<ContextItem>, limit: usize) -> Vec<ContextItem> {
    let mut kept: Vec<ContextItem> = Vec::with_capacity(limit.min(items.len()));
    let mut skipped: Vec<ContextItem> = Vec::new();

    for item in items {
        if kept.len() >= limit {
            break;
        }
        let too_similar = kept
            .iter()
            .any(|k| pairwise_similarity(k, &item) > 1.0 - DIVERSITY_TAU);
        if too_similar {
            skipped.push(item);
        } else {
            kept.push(item);
        }
    }

    // Backfill from the skipped pool if diversity left room.
    for item in skipped {
        if kept.len() >= limit {
            break;
        }
        kept.push(item);
    }
    kept
}

/// Phase 3: exact dedup by normalized title hash, then near-dup detection
/// over a sliding window of recent survivors. The duplicate with the
/// higher quality score wins.
fn dedup(items: Vec<ContextItem>) -> Vec<ContextItem> {
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut kept: Vec<ContextItem> = Vec::new();

    for item in items {
        let title_hash = normalized_title_hash(item.title());
        if !title_hash.is_empty() && !seen_titles.insert(title_hash) {
            continue;
        }

        let window_start = kept.len().saturating_sub(NEAR_DUP_WINDOW);
        let dup_idx = kept[window_start..]
            .iter()
            .position(|k| pairwise_similarity(k, &item) >= NEAR_DUP_THRESHOLD)
            .map(|i| window_start + i);

        match dup_idx {
            Some(i) => {
                if item.quality_score.unwrap_or(0.0) > kept[i].quality_score.unwrap_or(0.0) {
                    kept[i] = item;
                }
            }
            None => kept.push(item),
        }
    }
    kept
}

/// Phase 4: weighted sum of base, schema, and plan-alignment components.
fn rerank(items: &mut [ContextItem], plan: Option<&AnalysisPlan>) {
    for item in items.iter_mut() {
        let semantic = item.semantic_score.unwrap_or(0.5);
        let source_weight = item.source_weight.unwrap_or(1.0).min(2.0) / 2.0;
        let recency = item.recency_score.unwrap_or(0.5);
        let base = semantic * W_SEMANTIC + source_weight * W_SOURCE + recency * W_RECENCY;

        let quality = item.quality_score.unwrap_or(0.5);
        let featured = if item.is_featured { W_FEATURED } else { 0.0 };
        let synced = if item.synced { W_SYNCED } else { 0.0 };
        let degree = (item.graph_degree as f32 / 10.0).min(W_DEGREE_CAP);
        let schema = quality * W_QUALITY + featured + synced + degree;

        let alignment = plan.map(|p| plan_alignment(item, p)).unwrap_or(0.5);

        item.metadata_score = Some(base + schema + alignment * W_PLAN);
    }

    items.sort_by(|a, b| {
        b.metadata_score
            .partial_cmp(&a.metadata_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn plan_alignment(item: &ContextItem, plan: &AnalysisPlan) -> f32 {
    let mut score = 0.5f32;
    let text = item.text().to_lowercase();
    for focus in &plan.primary_focus {
        if text.contains(&focus.to_lowercase()) {
            score += 0.1;
        }
    }
    if plan.required_data_types.contains(&item.item_type) {
        score += 0.2;
    }
    score.min(1.0)
}

/// Phase 5: background → current → interpretation → corroboration. Within
/// a type, order by a metadata/recency blend.
fn sequence(items: &mut Vec<ContextItem>) {
    fn type_rank(t: ContextType) -> u8 {
        match t {
            ContextType::Company => 0,
            ContextType::News | ContextType::Event => 1,
            ContextType::Analysis | ContextType::Financial => 2,
            ContextType::Stock => 3,
        }
    }

    items.sort_by(|a, b| {
        let rank = type_rank(a.item_type).cmp(&type_rank(b.item_type));
        if rank != std::cmp::Ordering::Equal {
            return rank;
        }
        let score_a = a.metadata_score.unwrap_or(0.0) * 0.7 + a.recency_score.unwrap_or(0.0) * 0.3;
        let score_b = b.metadata_score.unwrap_or(0.0) * 0.7 + b.recency_score.unwrap_or(0.0) * 0.3;
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Mean pairwise dissimilarity of the retained set.
pub fn diversity_score(items: &[ContextItem]) -> f32 {
    if items.len() < 2 {
        return if items.is_empty() { 0.0 } else { 1.0 };
    }
    let mut total = 0.0f32;
    let mut pairs = 0u32;
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            total += 1.0 - pairwise_similarity(&items[i], &items[j]);
            pairs += 1;
        }
    }
    (total / pairs as f32).clamp(0.0, 1.0)
}

fn pairwise_similarity(a: &ContextItem, b: &ContextItem) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(va), Some(vb)) => cosine(va, vb),
        _ => jaccard(&a.text(), &b.text()),
    }
}

/// Word-set Jaccard similarity, the non-embedding fallback.
fn jaccard(a: &str, b: &str) -> f32 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f32;
    let union = set_a.union(&set_b).count() as f32;
    intersection / union
}

fn normalized_title_hash(title: &str) -> String {
    let normalized: String = title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if normalized.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(normalized.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketlens_common::{ContextSource, ContextType};
    use serde_json::{Map, Value};

    fn item(
        source: ContextSource,
        item_type: ContextType,
        title: &str,
        summary: &str,
    ) -> ContextItem {
        let mut content = Map::new();
        content.insert("title".into(), Value::String(title.into()));
        content.insert("summary".into(), Value::String(summary.into()));
        ContextItem::new(source, item_type, content)
    }

    fn news(title: &str, summary: &str) -> ContextItem {
        item(ContextSource::Search, ContextType::News, title, summary)
    }

    #[tokio::test]
    async fn cascade_drops_low_confidence_items() {
        let engineer = ContextEngineer::new(None);
        let mut weak = news("제목", "짧은 본문");
        weak.confidence = 0.1;
        let mut strong = news("삼성전자 영업이익 10조원 25% 증가", &"본문 ".repeat(300));
        strong.confidence = 0.9;
        strong.quality_score = Some(0.9);

        let (kept, _) = engineer
            .run(vec![weak, strong], "삼성전자", None, &EngineerOptions::default())
            .await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title(), "삼성전자 영업이익 10조원 25% 증가");
    }

    #[tokio::test]
    async fn confidence_stays_clamped() {
        let engineer = ContextEngineer::new(None);
        let mut boosted = item(
            ContextSource::Graph,
            ContextType::Company,
            "삼성전자 반도체 영업이익 10조원",
            &"실적 요약 25% 증가 10조원 삼성 ".repeat(50),
        );
        boosted.confidence = 0.95;
        boosted.is_featured = true;
        boosted.synced = true;
        boosted.quality_score = Some(1.0);

        let (kept, _) = engineer
            .run(vec![boosted], "삼성전자", None, &EngineerOptions::default())
            .await;
        assert!(kept[0].confidence <= 1.0);
        assert!(kept[0].quality_score.unwrap() <= 1.0);
    }

    #[tokio::test]
    async fn missing_quality_score_is_computed() {
        let engineer = ContextEngineer::new(None);
        let mut it = news("삼성전자 3분기 실적 발표 영업이익 증가", &"본문 ".repeat(200));
        it.confidence = 0.8;
        let (kept, _) = engineer
            .run(vec![it], "삼성전자 실적", None, &EngineerOptions::default())
            .await;
        assert!(kept[0].quality_score.is_some());
    }

    #[test]
    fn exact_dedup_keeps_one_copy() {
        let a = news("삼성전자 HBM 수주", "본문 A");
        let b = news("삼성전자  HBM 수주", "본문 B");
        let kept = dedup(vec![a, b]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn near_dup_keeps_higher_quality() {
        let mut a = news("삼성전자 HBM 대규모 수주 공시", "엔비디아向 HBM3E 공급 계약 체결 발표");
        a.quality_score = Some(0.4);
        let mut b = news("삼성 HBM 수주 보도", "엔비디아向 HBM3E 공급 계약 체결 발표");
        b.quality_score = Some(0.9);
        let kept = dedup(vec![a, b]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].quality_score, Some(0.9));
    }

    #[test]
    fn rerank_is_monotonic_in_quality() {
        let mut low = news("기사 하나", "내용");
        low.quality_score = Some(0.2);
        low.semantic_score = Some(0.5);
        let mut high = news("기사 둘", "내용");
        high.quality_score = Some(0.9);
        high.semantic_score = Some(0.5);

        let mut items = vec![low, high];
        rerank(&mut items, None);
        assert_eq!(items[0].title(), "기사 둘");
    }

    #[test]
    fn rerank_bonuses_are_additive() {
        let mut plain = news("기사", "내용");
        plain.quality_score = Some(0.5);
        plain.semantic_score = Some(0.5);
        let mut featured = news("기사", "내용");
        featured.quality_score = Some(0.5);
        featured.semantic_score = Some(0.5);
        featured.is_featured = true;
        featured.synced = true;

        let mut items = vec![plain, featured];
        rerank(&mut items, None);
        let diff = items[0].metadata_score.unwrap() - items[1].metadata_score.unwrap();
        assert!((diff - (W_FEATURED + W_SYNCED)).abs() < 1e-5);
    }

    #[test]
    fn plan_alignment_rewards_required_types() {
        let plan = AnalysisPlan {
            required_data_types: vec![ContextType::Financial],
            ..AnalysisPlan::default()
        };
        let financial = item(
            ContextSource::Graph,
            ContextType::Financial,
            "실적",
            "매출",
        );
        let general = news("실적", "매출");
        assert!(plan_alignment(&financial, &plan) > plan_alignment(&general, &plan));
    }

    #[test]
    fn sequencing_orders_company_before_news_before_stock() {
        let mut items = vec![
            item(ContextSource::Market, ContextType::Stock, "주가", ""),
            news("뉴스", ""),
            item(ContextSource::Graph, ContextType::Company, "기업", ""),
        ];
        sequence(&mut items);
        assert_eq!(items[0].item_type, ContextType::Company);
        assert_eq!(items[1].item_type, ContextType::News);
        assert_eq!(items[2].item_type, ContextType::Stock);
    }

    #[tokio::test]
    async fn prune_caps_at_limit() {
        let engineer = ContextEngineer::new(None);
        let items: Vec<ContextItem> = (0..60)
            .map(|i| {
                let mut it = news(
                    &format!("삼성전자 기사 {i} 영업이익 증가 발표"),
                    &format!("서로 다른 본문 내용 {i} ").repeat(30),
                );
                it.confidence = 0.9;
                it.quality_score = Some(0.8);
                it
            })
            .collect();
        let (kept, _) = engineer
            .run(items, "삼성전자", None, &EngineerOptions::default())
            .await;
        assert!(kept.len() <= FINAL_PRUNE_LIMIT);
    }

    #[test]
    fn diversity_score_of_identical_items_is_low() {
        let items = vec![news("같은 제목", "같은 내용"), news("같은 제목", "같은 내용")];
        assert!(diversity_score(&items) < 0.1);
    }

    #[test]
    fn diversity_score_of_distinct_items_is_high() {
        let items = vec![
            news("삼성전자 반도체 수주", "HBM 공급"),
            news("현대차 전기차 판매", "아이오닉 북미"),
        ];
        assert!(diversity_score(&items) > 0.8);
    }

    #[test]
    fn keyword_relevance_fraction() {
        assert_eq!(keyword_relevance("삼성 실적", "삼성 발표"), 0.5);
        assert_eq!(keyword_relevance("", "본문"), 0.0);
    }
}
